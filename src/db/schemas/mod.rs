//! Database schemas for Studbook
//!
//! Defines MongoDB document structures for animals, accounts, transfers and
//! notifications. The public projection document lives with the projection
//! layer.

mod account;
mod animal;
mod metadata;
mod notification;
mod transfer;

pub use account::{AccountDoc, PrivacyPreferences, ACCOUNT_COLLECTION};
pub use animal::{AnimalDetails, AnimalDoc, AnimalSummary, SoldStatus, ANIMAL_COLLECTION};
pub use metadata::Metadata;
pub use notification::{
    NotificationDetails, NotificationDoc, NotificationKind, NOTIFICATION_COLLECTION,
};
pub use transfer::{TransferDoc, TransferStatus, TransferType, TRANSFER_COLLECTION};
