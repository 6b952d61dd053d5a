//! Database layer for Studbook
//!
//! Provides MongoDB storage for animals, accounts, transfers, notifications
//! and public projections.

pub mod mongo;
pub mod schemas;

pub use mongo::{is_duplicate_key, MongoClient, MongoCollection};
pub use schemas::{AccountDoc, AnimalDoc, Metadata, NotificationDoc, TransferDoc};
