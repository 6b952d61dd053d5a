//! Public projection layer
//!
//! - `document`: the projected document shape and its indexes
//! - `privacy`: the pure projector (animal + owner preferences -> document)
//! - `store`: hot cache over the persisted projections
//! - `reconcile`: drift repair sweep

pub mod document;
pub mod privacy;
pub mod reconcile;
pub mod store;

pub use document::{PublicAnimalDoc, PUBLIC_ANIMAL_COLLECTION};
pub use privacy::{project, OwnerView, Section};
pub use reconcile::{spawn_reconcile_task, ReconcileReport, Reconciler};
pub use store::{HotCacheStats, ProjectionConfig, ProjectionStore};
