//! In-memory ledger store
//!
//! Used in dev mode when MongoDB is unavailable and by the test suites.
//! Every mutation takes the single write lock, validates the whole unit
//! against the current state, and only then writes, so a failed
//! resolution leaves nothing behind.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::schemas::{AccountDoc, AnimalDoc, PrivacyPreferences, TransferDoc, TransferStatus};
use crate::projection::document::PublicAnimalDoc;
use crate::types::{Result, StudbookError};

use super::{
    apply_effect, project_with, LedgerStore, Resolution, ResolutionOutcome, TransferFilter,
};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, AccountDoc>,
    animals: HashMap<String, AnimalDoc>,
    transfers: HashMap<String, TransferDoc>,
    projections: HashMap<String, PublicAnimalDoc>,
}

impl MemoryState {
    fn pending_exists(&self, animal_id_public: &str, to_user_id: &str) -> bool {
        self.transfers.values().any(|t| {
            t.status == TransferStatus::Pending
                && t.animal_id_public == animal_id_public
                && t.to_user_id == to_user_id
        })
    }
}

/// Ledger store backed by process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a projection as-is, bypassing the projector
    #[cfg(test)]
    pub(crate) async fn put_projection(&self, projection: PublicAnimalDoc) {
        let mut state = self.state.write().await;
        state
            .projections
            .insert(projection.id_public.clone(), projection);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_account(&self, account: AccountDoc) -> Result<()> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.id)
            || state.accounts.values().any(|a| a.public_id == account.public_id)
        {
            return Err(StudbookError::Conflict(format!(
                "Account {} already exists",
                account.id
            )));
        }
        state.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn find_account(&self, account_id: &str) -> Result<Option<AccountDoc>> {
        Ok(self.state.read().await.accounts.get(account_id).cloned())
    }

    async fn find_account_by_public_id(&self, public_id: &str) -> Result<Option<AccountDoc>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.public_id == public_id)
            .cloned())
    }

    async fn update_privacy(
        &self,
        account_id: &str,
        privacy: PrivacyPreferences,
    ) -> Result<Option<AccountDoc>> {
        let mut state = self.state.write().await;
        Ok(state.accounts.get_mut(account_id).map(|account| {
            account.privacy = privacy;
            account.metadata.touch();
            account.clone()
        }))
    }

    async fn insert_animal(&self, animal: AnimalDoc) -> Result<()> {
        let mut state = self.state.write().await;
        if state.animals.contains_key(&animal.id_public) {
            return Err(StudbookError::Conflict(format!(
                "Animal {} already exists",
                animal.id_public
            )));
        }
        if let Some(owner) = state.accounts.get_mut(&animal.owner_id) {
            if !owner.owns(&animal.id_public) {
                owner.owned_animals.push(animal.id_public.clone());
            }
        }
        state.animals.insert(animal.id_public.clone(), animal);
        Ok(())
    }

    async fn find_animal(&self, id_public: &str) -> Result<Option<AnimalDoc>> {
        let state = self.state.read().await;
        Ok(state
            .animals
            .get(id_public)
            .filter(|a| !a.metadata.is_deleted)
            .cloned())
    }

    async fn animals_owned_by(&self, owner_id: &str) -> Result<Vec<AnimalDoc>> {
        let state = self.state.read().await;
        let mut animals: Vec<AnimalDoc> = state
            .animals
            .values()
            .filter(|a| a.owner_id == owner_id && !a.metadata.is_deleted)
            .cloned()
            .collect();
        animals.sort_by(|a, b| a.id_public.cmp(&b.id_public));
        Ok(animals)
    }

    async fn list_animals(&self) -> Result<Vec<AnimalDoc>> {
        let state = self.state.read().await;
        let mut animals: Vec<AnimalDoc> = state
            .animals
            .values()
            .filter(|a| !a.metadata.is_deleted)
            .cloned()
            .collect();
        animals.sort_by(|a, b| a.id_public.cmp(&b.id_public));
        Ok(animals)
    }

    async fn revoke_view_only(
        &self,
        id_public: &str,
        account_id: &str,
        expected_owner_id: &str,
    ) -> Result<AnimalDoc> {
        let mut state = self.state.write().await;
        let animal = state
            .animals
            .get_mut(id_public)
            .filter(|a| !a.metadata.is_deleted)
            .ok_or_else(|| StudbookError::NotFound(format!("Animal {} not found", id_public)))?;
        if !animal.is_owned_by(expected_owner_id) {
            return Err(StudbookError::PreconditionFailed(format!(
                "Animal {} is not owned by {}",
                id_public, expected_owner_id
            )));
        }
        if animal.revoke_view_only(account_id) {
            animal.metadata.touch();
        }
        Ok(animal.clone())
    }

    async fn insert_transfer(&self, transfer: TransferDoc) -> Result<()> {
        let mut state = self.state.write().await;
        if state.pending_exists(&transfer.animal_id_public, &transfer.to_user_id) {
            return Err(StudbookError::Conflict(format!(
                "A pending transfer of {} to {} already exists",
                transfer.animal_id_public, transfer.to_user_id
            )));
        }
        state.transfers.insert(transfer.id.clone(), transfer);
        Ok(())
    }

    async fn find_transfer(&self, transfer_id: &str) -> Result<Option<TransferDoc>> {
        Ok(self.state.read().await.transfers.get(transfer_id).cloned())
    }

    async fn list_transfers(
        &self,
        account_id: &str,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferDoc>> {
        let state = self.state.read().await;
        let mut transfers: Vec<TransferDoc> = state
            .transfers
            .values()
            .filter(|t| filter.matches(t, account_id))
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(transfers)
    }

    async fn apply_resolution(&self, resolution: Resolution) -> Result<ResolutionOutcome> {
        let mut state = self.state.write().await;

        // Validate the whole unit first
        let transfer = state.transfers.get(&resolution.transfer_id).ok_or_else(|| {
            StudbookError::NotFound(format!("Transfer {} not found", resolution.transfer_id))
        })?;
        if transfer.status != TransferStatus::Pending {
            return Err(StudbookError::InvalidState(format!(
                "Transfer {} is already {}",
                transfer.id, transfer.status
            )));
        }

        let mut next_animal = None;
        if let Some(effect) = &resolution.effect {
            let current = state
                .animals
                .get(&effect.animal_id_public)
                .filter(|a| !a.metadata.is_deleted)
                .ok_or_else(|| {
                    StudbookError::NotFound(format!("Animal {} not found", effect.animal_id_public))
                })?;
            if !current.is_owned_by(&effect.expected_owner_id) {
                return Err(StudbookError::PreconditionFailed(format!(
                    "Animal {} is no longer owned by {}",
                    effect.animal_id_public, effect.expected_owner_id
                )));
            }
            let new_owner = effect
                .ownership
                .as_ref()
                .and_then(|c| state.accounts.get(&c.new_owner_id));
            let mut animal = current.clone();
            apply_effect(&mut animal, effect, new_owner);
            next_animal = Some(animal);
        }

        // Commit
        let mut projection = None;
        if let (Some(effect), Some(animal)) = (&resolution.effect, &next_animal) {
            if let Some(change) = &effect.ownership {
                if let Some(prev) = state.accounts.get_mut(&change.previous_owner_id) {
                    prev.owned_animals.retain(|a| a != &animal.id_public);
                }
                if let Some(next) = state.accounts.get_mut(&change.new_owner_id) {
                    if !next.owns(&animal.id_public) {
                        next.owned_animals.push(animal.id_public.clone());
                    }
                }
            }
            let owner = state.accounts.get(&animal.owner_id);
            projection = project_with(animal, owner);
            match &projection {
                Some(doc) => {
                    state.projections.insert(animal.id_public.clone(), doc.clone());
                }
                None => {
                    state.projections.remove(&animal.id_public);
                }
            }
            state.animals.insert(animal.id_public.clone(), animal.clone());
        }

        let transfer = state
            .transfers
            .get_mut(&resolution.transfer_id)
            .ok_or_else(|| StudbookError::Internal("Transfer vanished under lock".into()))?;
        transfer.status = resolution.status;
        transfer.responded_at = Some(resolution.responded_at);
        transfer.metadata.touch();

        Ok(ResolutionOutcome {
            transfer: transfer.clone(),
            animal: next_animal,
            projection,
        })
    }

    async fn find_projection(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        Ok(self.state.read().await.projections.get(id_public).cloned())
    }

    async fn reproject(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        let mut state = self.state.write().await;
        let projection = state
            .animals
            .get(id_public)
            .filter(|a| !a.metadata.is_deleted)
            .and_then(|animal| project_with(animal, state.accounts.get(&animal.owner_id)));
        match &projection {
            Some(doc) => {
                state.projections.insert(id_public.to_string(), doc.clone());
            }
            None => {
                state.projections.remove(id_public);
            }
        }
        Ok(projection)
    }

    async fn list_projections(&self) -> Result<Vec<PublicAnimalDoc>> {
        let state = self.state.read().await;
        let mut docs: Vec<PublicAnimalDoc> = state.projections.values().cloned().collect();
        docs.sort_by(|a, b| a.id_public.cmp(&b.id_public));
        Ok(docs)
    }

    async fn collapse_duplicate_projections(&self) -> Result<usize> {
        // Keyed map: duplicates cannot exist
        Ok(0)
    }
}
