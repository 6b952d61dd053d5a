//! Notification document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, TransferStatus, TransferType};

/// Collection name for notifications
pub const NOTIFICATION_COLLECTION: &str = "notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    TransferProposed,
    TransferAccepted,
    TransferDeclined,
    ViewOnlyGranted,
}

/// References carried by a notification
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NotificationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_id_public: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_type: Option<TransferType>,

    /// The other party of the transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_id: Option<String>,
}

/// Notification document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NotificationDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Addressee
    pub account_id: String,

    pub kind: NotificationKind,

    pub message: String,

    /// Mirrors the referenced transfer's status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,

    #[serde(default)]
    pub details: NotificationDetails,

    /// Read/unread, independent of the transfer status
    #[serde(default)]
    pub read: bool,

    pub created_at: DateTime,
}

impl NotificationDoc {
    pub fn new(
        account_id: impl Into<String>,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            account_id: account_id.into(),
            kind,
            message: message.into(),
            status: None,
            details: NotificationDetails::default(),
            read: false,
            created_at: DateTime::now(),
        }
    }

    pub fn with_status(mut self, status: TransferStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: NotificationDetails) -> Self {
        self.details = details;
        self
    }
}

impl Default for NotificationDoc {
    fn default() -> Self {
        Self::new("", NotificationKind::default(), "")
    }
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "account_id": 1, "read": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("account_inbox_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "details.transfer_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("transfer_ref_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_notification_is_unread() {
        let n = NotificationDoc::default();
        assert!(!n.read);
        assert!(n.status.is_none());
        assert_eq!(n.kind, NotificationKind::TransferProposed);
        assert!(!n.id.is_empty());
    }

    #[test]
    fn test_details_are_nested_under_details() {
        let n = NotificationDoc::new("u2", NotificationKind::TransferProposed, "offer")
            .with_details(NotificationDetails {
                transfer_id: Some("t1".into()),
                ..Default::default()
            });
        let doc = bson::to_document(&n).unwrap();
        let details = doc.get_document("details").unwrap();
        assert_eq!(details.get_str("transfer_id").unwrap(), "t1");
        assert!(doc.get_datetime("created_at").is_ok());
    }
}
