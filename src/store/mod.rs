//! Ledger storage
//!
//! `LedgerStore` is the seam between the transfer state machine and the
//! document store. Two implementations:
//!
//! - [`MongoLedgerStore`]: MongoDB; the resolution of a transfer runs as one
//!   multi-document transaction (replica set required).
//! - [`MemoryLedgerStore`]: in-process; dev mode and tests.
//!
//! Both apply a [`Resolution`] all-or-nothing: the transfer status change,
//! the animal mutation, the owned-animal sets and the public projection are
//! committed together or not at all.

use async_trait::async_trait;
use bson::DateTime;
use serde::Deserialize;
use tracing::warn;

use crate::db::schemas::{
    AccountDoc, AnimalDoc, PrivacyPreferences, SoldStatus, TransferDoc, TransferStatus,
};
use crate::projection::document::PublicAnimalDoc;
use crate::projection::privacy::{self, OwnerView};
use crate::types::Result;

pub mod memory;
pub mod mongo;

pub use memory::MemoryLedgerStore;
pub use mongo::MongoLedgerStore;

/// Ownership move applied on acceptance
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipChange {
    pub previous_owner_id: String,
    pub new_owner_id: String,
}

/// Animal mutation applied together with a transfer resolution
#[derive(Debug, Clone, PartialEq)]
pub struct AnimalEffect {
    pub animal_id_public: String,
    /// Owner the animal must still have when the unit commits
    pub expected_owner_id: String,
    pub ownership: Option<OwnershipChange>,
    pub sold_status: Option<SoldStatus>,
    /// Added with set semantics
    pub grant_view_only: Vec<String>,
}

/// A transfer leaving `pending`
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub responded_at: DateTime,
    pub effect: Option<AnimalEffect>,
}

/// Committed result of a resolution
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub transfer: TransferDoc,
    /// Animal after the mutation, when there was one
    pub animal: Option<AnimalDoc>,
    /// Projection written in the same unit (`None` = removed / never existed)
    pub projection: Option<PublicAnimalDoc>,
}

/// Which side of a transfer the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Filter for listing a caller's transfers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferFilter {
    #[serde(default)]
    pub status: Option<TransferStatus>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &TransferDoc, account_id: &str) -> bool {
        let party = match self.direction {
            Some(Direction::Incoming) => transfer.to_user_id == account_id,
            Some(Direction::Outgoing) => transfer.from_user_id == account_id,
            None => transfer.is_party(account_id),
        };
        party && self.status.map_or(true, |s| transfer.status == s)
    }
}

/// Storage operations needed by the transfer subsystem
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // accounts
    async fn insert_account(&self, account: AccountDoc) -> Result<()>;
    async fn find_account(&self, account_id: &str) -> Result<Option<AccountDoc>>;
    async fn find_account_by_public_id(&self, public_id: &str) -> Result<Option<AccountDoc>>;
    async fn update_privacy(
        &self,
        account_id: &str,
        privacy: PrivacyPreferences,
    ) -> Result<Option<AccountDoc>>;

    // animals
    /// Insert a new animal and add it to its owner's owned set
    async fn insert_animal(&self, animal: AnimalDoc) -> Result<()>;
    async fn find_animal(&self, id_public: &str) -> Result<Option<AnimalDoc>>;
    async fn animals_owned_by(&self, owner_id: &str) -> Result<Vec<AnimalDoc>>;
    async fn list_animals(&self) -> Result<Vec<AnimalDoc>>;
    /// Explicit administrative removal from `view_only_for_users`.
    /// Fails with `PreconditionFailed` if the animal is not owned by
    /// `expected_owner_id`.
    async fn revoke_view_only(
        &self,
        id_public: &str,
        account_id: &str,
        expected_owner_id: &str,
    ) -> Result<AnimalDoc>;

    // transfers
    /// Insert a pending transfer. A second pending transfer for the same
    /// (animal, recipient) fails with `Conflict`.
    async fn insert_transfer(&self, transfer: TransferDoc) -> Result<()>;
    async fn find_transfer(&self, transfer_id: &str) -> Result<Option<TransferDoc>>;
    /// Newest first
    async fn list_transfers(
        &self,
        account_id: &str,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferDoc>>;
    /// Apply a resolution atomically (compare-and-swap on `pending`)
    async fn apply_resolution(&self, resolution: Resolution) -> Result<ResolutionOutcome>;

    // projections
    async fn find_projection(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>>;
    /// Re-derive an animal's projection from the animal and owner records as
    /// they stand at write time, then upsert it (or remove it when the animal
    /// is gone or not public). Read and write form one atomic unit, so a
    /// concurrently committed ownership change is never overwritten.
    async fn reproject(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>>;
    async fn list_projections(&self) -> Result<Vec<PublicAnimalDoc>>;
    /// Merge projection documents sharing a public id down to one.
    /// Returns how many surplus documents were removed.
    async fn collapse_duplicate_projections(&self) -> Result<usize>;
}

/// Apply an effect to an animal in memory.
///
/// Shared by both stores so the committed state is computed identically.
pub(crate) fn apply_effect(
    animal: &mut AnimalDoc,
    effect: &AnimalEffect,
    new_owner: Option<&AccountDoc>,
) {
    if let Some(change) = &effect.ownership {
        if animal.original_owner_id.is_none() {
            animal.original_owner_id = Some(change.previous_owner_id.clone());
        }
        animal.owner_id = change.new_owner_id.clone();
        if let Some(owner) = new_owner {
            animal.owner_id_public = owner.public_id.clone();
        }
    }
    if let Some(status) = effect.sold_status {
        animal.sold_status = status;
    }
    for account in &effect.grant_view_only {
        animal.grant_view_only(account);
    }
    animal.metadata.touch();
}

/// Project an animal with whichever owner record is available.
///
/// A missing owner account falls back to the most restrictive preferences.
pub(crate) fn project_with(
    animal: &AnimalDoc,
    owner: Option<&AccountDoc>,
) -> Option<PublicAnimalDoc> {
    match owner {
        Some(account) => privacy::project(animal, &OwnerView::from(account)),
        None => {
            warn!(
                animal = %animal.id_public,
                owner = %animal.owner_id,
                "Owner account missing, projecting with restrictive defaults"
            );
            privacy::project(animal, &OwnerView::fallback(animal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::TransferType;

    #[test]
    fn test_apply_effect_moves_ownership_and_keeps_previous_owner_reading() {
        let mut animal = AnimalDoc::new("X1", "cat", "u1", "U1-PUB");
        let new_owner = AccountDoc::new("u2", "U2-PUB", "Buyer");
        let effect = AnimalEffect {
            animal_id_public: "X1".into(),
            expected_owner_id: "u1".into(),
            ownership: Some(OwnershipChange {
                previous_owner_id: "u1".into(),
                new_owner_id: "u2".into(),
            }),
            sold_status: Some(SoldStatus::Sold),
            grant_view_only: vec!["u1".into()],
        };

        apply_effect(&mut animal, &effect, Some(&new_owner));

        assert_eq!(animal.owner_id, "u2");
        assert_eq!(animal.owner_id_public, "U2-PUB");
        assert_eq!(animal.original_owner_id.as_deref(), Some("u1"));
        assert_eq!(animal.sold_status, SoldStatus::Sold);
        assert!(animal.has_view_only("u1"));
    }

    #[test]
    fn test_apply_effect_keeps_first_original_owner() {
        let mut animal = AnimalDoc::new("X1", "cat", "u2", "U2-PUB");
        animal.original_owner_id = Some("u0".into());
        let effect = AnimalEffect {
            animal_id_public: "X1".into(),
            expected_owner_id: "u2".into(),
            ownership: Some(OwnershipChange {
                previous_owner_id: "u2".into(),
                new_owner_id: "u3".into(),
            }),
            sold_status: Some(SoldStatus::Sold),
            grant_view_only: vec!["u2".into()],
        };
        apply_effect(&mut animal, &effect, None);
        assert_eq!(animal.original_owner_id.as_deref(), Some("u0"));
        // Public id unchanged when the new owner record is unavailable
        assert_eq!(animal.owner_id_public, "U2-PUB");
    }

    #[test]
    fn test_transfer_filter() {
        let mut t = TransferDoc::pending("u1", "u2", "X1", TransferType::Sale, false);
        let incoming = TransferFilter {
            direction: Some(Direction::Incoming),
            ..Default::default()
        };
        assert!(incoming.matches(&t, "u2"));
        assert!(!incoming.matches(&t, "u1"));

        let accepted = TransferFilter {
            status: Some(TransferStatus::Accepted),
            ..Default::default()
        };
        assert!(!accepted.matches(&t, "u1"));
        t.status = TransferStatus::Accepted;
        assert!(accepted.matches(&t, "u1"));
        assert!(!accepted.matches(&t, "u3"));
    }
}
