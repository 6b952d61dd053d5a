//! Notification sink
//!
//! Side channel informing the counterpart of a transfer about state
//! changes. Delivery is best-effort: callers go through [`emit_best_effort`]
//! and [`resolve_best_effort`], which log failures and never return them.
//!
//! ## Extensibility
//!
//! The `NotificationSink` trait allows swapping implementations (MongoDB
//! inbox in production, in-memory for dev and tests, a push service later)
//! without touching the transfer state machine.

use async_trait::async_trait;
use bson::{doc, DateTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::schemas::{NotificationDoc, TransferStatus, NOTIFICATION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

// =============================================================================
// Trait
// =============================================================================

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    async fn emit(&self, notification: NotificationDoc) -> Result<()>;

    /// Mirror a transfer's new status onto the notifications referencing it.
    /// Returns how many were updated.
    async fn resolve(&self, transfer_id: &str, status: TransferStatus) -> Result<u64>;
}

/// Emit, logging instead of propagating any failure
pub async fn emit_best_effort(sink: &dyn NotificationSink, notification: NotificationDoc) {
    let account_id = notification.account_id.clone();
    let kind = notification.kind;
    match sink.emit(notification).await {
        Ok(()) => debug!(account = %account_id, ?kind, "Notification emitted"),
        Err(e) => warn!(account = %account_id, ?kind, "Notification emit failed: {}", e),
    }
}

/// Resolve, logging instead of propagating any failure
pub async fn resolve_best_effort(
    sink: &dyn NotificationSink,
    transfer_id: &str,
    status: TransferStatus,
) {
    if let Err(e) = sink.resolve(transfer_id, status).await {
        warn!(transfer_id = %transfer_id, %status, "Notification status update failed: {}", e);
    }
}

// =============================================================================
// MongoDB Implementation
// =============================================================================

/// MongoDB-backed inbox
pub struct MongoNotificationSink {
    collection: MongoCollection<NotificationDoc>,
}

impl MongoNotificationSink {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo
            .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
            .await?;
        Ok(Self { collection })
    }
}

#[async_trait]
impl NotificationSink for MongoNotificationSink {
    async fn emit(&self, notification: NotificationDoc) -> Result<()> {
        self.collection.insert_one(notification).await
    }

    async fn resolve(&self, transfer_id: &str, status: TransferStatus) -> Result<u64> {
        let result = self
            .collection
            .inner()
            .update_many(
                doc! { "details.transfer_id": transfer_id },
                doc! {
                    "$set": {
                        "status": status.as_str(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;
        Ok(result.modified_count)
    }
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

/// In-memory inbox for dev mode and tests
#[derive(Default)]
pub struct MemoryNotificationSink {
    inbox: RwLock<Vec<NotificationDoc>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications addressed to an account, oldest first
    pub async fn notifications_for(&self, account_id: &str) -> Vec<NotificationDoc> {
        self.inbox
            .read()
            .await
            .iter()
            .filter(|n| n.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn emit(&self, notification: NotificationDoc) -> Result<()> {
        info!(
            account = %notification.account_id,
            kind = ?notification.kind,
            "{}", notification.message
        );
        self.inbox.write().await.push(notification);
        Ok(())
    }

    async fn resolve(&self, transfer_id: &str, status: TransferStatus) -> Result<u64> {
        let mut inbox = self.inbox.write().await;
        let mut updated = 0;
        for n in inbox
            .iter_mut()
            .filter(|n| n.details.transfer_id.as_deref() == Some(transfer_id))
        {
            n.status = Some(status);
            n.metadata.touch();
            updated += 1;
        }
        Ok(updated)
    }
}
