//! Transfer service
//!
//! Validates every operation up front, then hands the mutation to the
//! ledger store as one atomic resolution. Notifications are emitted after
//! the commit and may fail without affecting the result.

use std::sync::Arc;

use bson::DateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::schemas::{
    AccountDoc, AnimalDoc, AnimalSummary, NotificationDetails, NotificationDoc, NotificationKind,
    PrivacyPreferences, SoldStatus, TransferDoc, TransferStatus, TransferType,
};
use crate::notify::{emit_best_effort, resolve_best_effort, NotificationSink};
use crate::projection::document::PublicAnimalDoc;
use crate::projection::store::ProjectionStore;
use crate::store::{AnimalEffect, LedgerStore, OwnershipChange, Resolution, TransferFilter};
use crate::types::{Result, StudbookError};

use super::{PrivacySettings, ProposeRequest, TransferView};

/// Result of an accept / accept-view-only call
#[derive(Debug, Clone, Serialize)]
pub struct Acceptance {
    pub transfer: TransferView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animal: Option<AnimalSummary>,
}

/// Result of a privacy preference change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyUpdate {
    pub privacy: PrivacySettings,
    pub reprojected: usize,
    pub failed: usize,
}

pub struct TransferService {
    ledger: Arc<dyn LedgerStore>,
    projections: Arc<ProjectionStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl TransferService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        projections: Arc<ProjectionStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ledger,
            projections,
            notifier,
        }
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Create a pending transfer and notify the recipient
    pub async fn propose(&self, from_user_id: &str, req: ProposeRequest) -> Result<TransferView> {
        let recipient = self.resolve_recipient(&req).await?;

        if recipient.id == from_user_id {
            return Err(StudbookError::PreconditionFailed(
                "Cannot transfer an animal to yourself".into(),
            ));
        }

        let animal = self
            .ledger
            .find_animal(&req.animal_id)
            .await?
            .ok_or_else(|| {
                StudbookError::PreconditionFailed(format!("Animal {} not found", req.animal_id))
            })?;

        if !animal.is_owned_by(from_user_id) {
            return Err(StudbookError::PreconditionFailed(format!(
                "Animal {} is not owned by the proposer",
                animal.id_public
            )));
        }

        match req.transfer_type {
            TransferType::Sale if animal.sold_status == SoldStatus::Sold => {
                return Err(StudbookError::PreconditionFailed(format!(
                    "Animal {} has already been sold",
                    animal.id_public
                )));
            }
            TransferType::Purchase if !req.offer_view_only => {
                return Err(StudbookError::PreconditionFailed(
                    "Purchase transfers can only offer view-only access".into(),
                ));
            }
            TransferType::Purchase if animal.sold_status == SoldStatus::Purchased => {
                return Err(StudbookError::PreconditionFailed(format!(
                    "Animal {} is already marked as purchased",
                    animal.id_public
                )));
            }
            _ => {}
        }

        let transfer = TransferDoc::pending(
            from_user_id,
            &recipient.id,
            &animal.id_public,
            req.transfer_type,
            req.offer_view_only,
        )
        .with_transaction_id(req.transaction_id);

        self.ledger.insert_transfer(transfer.clone()).await?;

        info!(
            transfer_id = %transfer.id,
            animal = %transfer.animal_id_public,
            from = %transfer.from_user_id,
            to = %transfer.to_user_id,
            transfer_type = %transfer.transfer_type,
            view_only = transfer.offer_view_only,
            "Transfer proposed"
        );

        let message = if transfer.offer_view_only {
            format!(
                "You have been offered view-only access to animal {}",
                transfer.animal_id_public
            )
        } else {
            format!(
                "You have a pending {} of animal {} to review",
                transfer.transfer_type, transfer.animal_id_public
            )
        };
        self.notify(
            &transfer,
            &transfer.to_user_id,
            &transfer.from_user_id,
            NotificationKind::TransferProposed,
            message,
        )
        .await;

        Ok(TransferView::from(&transfer))
    }

    /// Accept a pending transfer as its recipient
    pub async fn accept(&self, actor: &str, transfer_id: &str) -> Result<Acceptance> {
        let transfer = self.pending_for_recipient(actor, transfer_id).await?;
        self.commit_acceptance(transfer).await
    }

    /// Decline a pending transfer as its recipient
    pub async fn decline(&self, actor: &str, transfer_id: &str) -> Result<TransferView> {
        let transfer = self.pending_for_recipient(actor, transfer_id).await?;

        let outcome = self
            .ledger
            .apply_resolution(Resolution {
                transfer_id: transfer.id.clone(),
                status: TransferStatus::Declined,
                responded_at: DateTime::now(),
                effect: None,
            })
            .await?;
        let transfer = outcome.transfer;

        info!(transfer_id = %transfer.id, animal = %transfer.animal_id_public, "Transfer declined");

        self.notify(
            &transfer,
            &transfer.from_user_id,
            &transfer.to_user_id,
            NotificationKind::TransferDeclined,
            format!(
                "Your {} proposal for animal {} was declined",
                transfer.transfer_type, transfer.animal_id_public
            ),
        )
        .await;
        resolve_best_effort(self.notifier.as_ref(), &transfer.id, transfer.status).await;

        Ok(TransferView::from(&transfer))
    }

    /// Accept a view-only offer. Accepting an offer this recipient already
    /// accepted returns it unchanged.
    pub async fn accept_view_only(&self, actor: &str, transfer_id: &str) -> Result<Acceptance> {
        let transfer = self.find_transfer(transfer_id).await?;

        if !transfer.offer_view_only {
            return Err(StudbookError::PreconditionFailed(format!(
                "Transfer {} does not offer view-only access",
                transfer.id
            )));
        }
        if transfer.to_user_id != actor {
            return Err(StudbookError::Unauthorized(
                "Only the recipient may accept this transfer".into(),
            ));
        }

        match transfer.status {
            TransferStatus::Accepted => return self.already_accepted(transfer).await,
            TransferStatus::Declined => {
                return Err(StudbookError::InvalidState(format!(
                    "Transfer {} is already declined",
                    transfer.id
                )));
            }
            TransferStatus::Pending => {}
        }

        match self.commit_acceptance(transfer).await {
            // Lost a race against an identical call
            Err(StudbookError::InvalidState(msg)) => {
                let current = self.find_transfer(transfer_id).await?;
                if current.status == TransferStatus::Accepted {
                    self.already_accepted(current).await
                } else {
                    Err(StudbookError::InvalidState(msg))
                }
            }
            other => other,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Transfers where the caller is sender or recipient, newest first
    pub async fn list(&self, actor: &str, filter: &TransferFilter) -> Result<Vec<TransferView>> {
        let transfers = self.ledger.list_transfers(actor, filter).await?;
        Ok(transfers.iter().map(TransferView::from).collect())
    }

    /// One transfer, visible to its parties only
    pub async fn get(&self, actor: &str, transfer_id: &str) -> Result<TransferView> {
        let transfer = self.find_transfer(transfer_id).await?;
        if !transfer.is_party(actor) {
            return Err(StudbookError::Unauthorized(
                "Only the parties of a transfer may read it".into(),
            ));
        }
        Ok(TransferView::from(&transfer))
    }

    /// Private record, for the owner and view-only members
    pub async fn read_animal(&self, actor: &str, id_public: &str) -> Result<AnimalDoc> {
        let animal = self.find_animal(id_public).await?;
        if !animal.can_read(actor) {
            return Err(StudbookError::Unauthorized(format!(
                "No read access to animal {}",
                id_public
            )));
        }
        Ok(animal)
    }

    /// Public projection of an animal
    pub async fn public_animal(&self, id_public: &str) -> Result<PublicAnimalDoc> {
        self.projections
            .get(id_public)
            .await?
            .ok_or_else(|| StudbookError::NotFound(format!("No public record for {}", id_public)))
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Remove an account's view-only access. Owner only.
    pub async fn revoke_view_only(
        &self,
        actor: &str,
        id_public: &str,
        account_id: &str,
    ) -> Result<AnimalSummary> {
        let animal = self.find_animal(id_public).await?;
        if !animal.is_owned_by(actor) {
            return Err(StudbookError::Unauthorized(
                "Only the owner may revoke view-only access".into(),
            ));
        }
        let animal = self
            .ledger
            .revoke_view_only(id_public, account_id, actor)
            .await?;
        info!(animal = %id_public, account = %account_id, "View-only access revoked");
        Ok(animal.summary())
    }

    /// Persist new privacy preferences and re-project every owned animal
    pub async fn update_privacy(
        &self,
        actor: &str,
        privacy: PrivacyPreferences,
    ) -> Result<PrivacyUpdate> {
        let account = self
            .ledger
            .update_privacy(actor, privacy)
            .await?
            .ok_or_else(|| StudbookError::NotFound(format!("Account {} not found", actor)))?;

        let mut update = PrivacyUpdate {
            privacy: account.privacy.into(),
            reprojected: 0,
            failed: 0,
        };
        for animal in self.ledger.animals_owned_by(actor).await? {
            match self.projections.refresh(&animal.id_public).await {
                Ok(_) => update.reprojected += 1,
                Err(e) => {
                    // Left for the reconciler
                    warn!(animal = %animal.id_public, "Re-projection failed: {}", e);
                    update.failed += 1;
                }
            }
        }

        info!(
            account = %actor,
            reprojected = update.reprojected,
            failed = update.failed,
            "Privacy preferences updated"
        );
        Ok(update)
    }

    /// Re-project a single animal
    pub async fn refresh_animal(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        let animal = self.find_animal(id_public).await?;
        self.projections.refresh(&animal.id_public).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn resolve_recipient(&self, req: &ProposeRequest) -> Result<AccountDoc> {
        let found = match (&req.to_user_id, &req.to_user_public_id) {
            (Some(id), _) => self.ledger.find_account(id).await?,
            (None, Some(public_id)) => self.ledger.find_account_by_public_id(public_id).await?,
            (None, None) => {
                return Err(StudbookError::BadRequest(
                    "toUserId or toUserPublicId is required".into(),
                ))
            }
        };
        found.ok_or_else(|| StudbookError::NotFound("Recipient account not found".into()))
    }

    async fn find_transfer(&self, transfer_id: &str) -> Result<TransferDoc> {
        self.ledger
            .find_transfer(transfer_id)
            .await?
            .ok_or_else(|| StudbookError::NotFound(format!("Transfer {} not found", transfer_id)))
    }

    async fn find_animal(&self, id_public: &str) -> Result<AnimalDoc> {
        self.ledger
            .find_animal(id_public)
            .await?
            .ok_or_else(|| StudbookError::NotFound(format!("Animal {} not found", id_public)))
    }

    async fn pending_for_recipient(&self, actor: &str, transfer_id: &str) -> Result<TransferDoc> {
        let transfer = self.find_transfer(transfer_id).await?;
        if transfer.status.is_terminal() {
            return Err(StudbookError::InvalidState(format!(
                "Transfer {} is already {}",
                transfer.id, transfer.status
            )));
        }
        if transfer.to_user_id != actor {
            return Err(StudbookError::Unauthorized(
                "Only the recipient may respond to this transfer".into(),
            ));
        }
        Ok(transfer)
    }

    async fn commit_acceptance(&self, transfer: TransferDoc) -> Result<Acceptance> {
        let outcome = self
            .ledger
            .apply_resolution(Resolution {
                transfer_id: transfer.id.clone(),
                status: TransferStatus::Accepted,
                responded_at: DateTime::now(),
                effect: Some(effect_for(&transfer)),
            })
            .await?;

        self.projections
            .publish(&transfer.animal_id_public, outcome.projection.as_ref());

        let transfer = outcome.transfer;
        info!(
            transfer_id = %transfer.id,
            animal = %transfer.animal_id_public,
            view_only = transfer.offer_view_only,
            public = outcome.projection.is_some(),
            "Transfer accepted"
        );

        let (kind, message) = if transfer.offer_view_only {
            (
                NotificationKind::ViewOnlyGranted,
                format!(
                    "Your view-only offer for animal {} was accepted",
                    transfer.animal_id_public
                ),
            )
        } else {
            (
                NotificationKind::TransferAccepted,
                format!(
                    "Your {} of animal {} was accepted",
                    transfer.transfer_type, transfer.animal_id_public
                ),
            )
        };
        self.notify(&transfer, &transfer.from_user_id, &transfer.to_user_id, kind, message)
            .await;
        resolve_best_effort(self.notifier.as_ref(), &transfer.id, transfer.status).await;

        Ok(Acceptance {
            transfer: TransferView::from(&transfer),
            animal: outcome.animal.as_ref().map(AnimalDoc::summary),
        })
    }

    async fn already_accepted(&self, transfer: TransferDoc) -> Result<Acceptance> {
        debug!(transfer_id = %transfer.id, "View-only offer already accepted");
        let animal = self.ledger.find_animal(&transfer.animal_id_public).await?;
        Ok(Acceptance {
            transfer: TransferView::from(&transfer),
            animal: animal.as_ref().map(AnimalDoc::summary),
        })
    }

    async fn notify(
        &self,
        transfer: &TransferDoc,
        to: &str,
        counterpart: &str,
        kind: NotificationKind,
        message: String,
    ) {
        let notification = NotificationDoc::new(to, kind, message)
            .with_status(transfer.status)
            .with_details(NotificationDetails {
                transfer_id: Some(transfer.id.clone()),
                animal_id_public: Some(transfer.animal_id_public.clone()),
                transfer_type: Some(transfer.transfer_type),
                counterpart_id: Some(counterpart.to_string()),
            });
        emit_best_effort(self.notifier.as_ref(), notification).await;
    }
}

/// Animal mutation implied by accepting a transfer
fn effect_for(transfer: &TransferDoc) -> AnimalEffect {
    if transfer.moves_ownership() {
        AnimalEffect {
            animal_id_public: transfer.animal_id_public.clone(),
            expected_owner_id: transfer.from_user_id.clone(),
            ownership: Some(OwnershipChange {
                previous_owner_id: transfer.from_user_id.clone(),
                new_owner_id: transfer.to_user_id.clone(),
            }),
            sold_status: Some(match transfer.transfer_type {
                TransferType::Sale => SoldStatus::Sold,
                TransferType::Purchase => SoldStatus::Purchased,
            }),
            grant_view_only: vec![transfer.from_user_id.clone()],
        }
    } else {
        AnimalEffect {
            animal_id_public: transfer.animal_id_public.clone(),
            expected_owner_id: transfer.from_user_id.clone(),
            ownership: None,
            sold_status: None,
            grant_view_only: vec![transfer.to_user_id.clone()],
        }
    }
}
