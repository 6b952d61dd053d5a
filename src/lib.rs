//! Studbook - ownership transfers for pedigree records
//!
//! Owners propose transfers of an animal to another account; the recipient
//! accepts (ownership moves), accepts view-only access, or declines. Each
//! resolution commits the transfer status, the animal record, both accounts'
//! owned sets and the animal's public projection as one unit.
//!
//! ## Services
//!
//! - **Transfers**: propose/accept/decline state machine over a ledger store
//! - **Store**: `LedgerStore` trait with MongoDB (transactional) and in-memory backends
//! - **Projection**: privacy-filtered public documents, hot cache and reconciler
//! - **Notify**: best-effort notification inbox for transfer counterparts

pub mod config;
pub mod db;
pub mod notify;
pub mod projection;
pub mod routes;
pub mod server;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, StudbookError};
