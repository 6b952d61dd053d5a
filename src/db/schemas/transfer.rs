//! Transfer ledger schema
//!
//! One document per ownership-change proposal. A transfer has its own
//! lifecycle (`pending -> accepted | declined`) independent of the animal it
//! references; both outcomes are terminal.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for transfers
pub const TRANSFER_COLLECTION: &str = "transfers";

/// Direction of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Ownership moves from the proposer to the recipient
    #[default]
    Sale,
    /// The proposer already owns the animal and offers the previous party
    /// view-only access
    Purchase,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Purchase => "purchase",
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransferDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Proposer
    pub from_user_id: String,

    /// Party addressed by the proposal; the only account allowed to respond
    pub to_user_id: String,

    pub transfer_type: TransferType,

    /// When true, acceptance grants read access only
    #[serde(default)]
    pub offer_view_only: bool,

    pub status: TransferStatus,

    pub animal_id_public: String,

    /// Advisory link to the financial record that triggered the proposal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    pub created_at: DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime>,
}

impl TransferDoc {
    /// Create a new pending transfer
    pub fn pending(
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        animal_id_public: impl Into<String>,
        transfer_type: TransferType,
        offer_view_only: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            transfer_type,
            offer_view_only,
            status: TransferStatus::Pending,
            animal_id_public: animal_id_public.into(),
            transaction_id: None,
            created_at: DateTime::now(),
            responded_at: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: Option<String>) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn is_party(&self, account_id: &str) -> bool {
        self.from_user_id == account_id || self.to_user_id == account_id
    }

    /// Whether acceptance moves ownership
    pub fn moves_ownership(&self) -> bool {
        !self.offer_view_only
    }
}

impl Default for TransferDoc {
    fn default() -> Self {
        Self::pending("", "", "", TransferType::default(), false)
    }
}

impl IntoIndexes for TransferDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // At most one pending proposal per (animal, recipient)
            (
                doc! { "animal_id_public": 1, "to_user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "status": "pending" })
                        .name("pending_per_recipient_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "from_user_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("from_user_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "to_user_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("to_user_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TransferDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transfer_defaults() {
        let t = TransferDoc::pending("u1", "u2", "X1", TransferType::Sale, false);
        assert_eq!(t.status, TransferStatus::Pending);
        assert!(t.responded_at.is_none());
        assert!(t.moves_ownership());
        assert!(t.is_party("u1"));
        assert!(t.is_party("u2"));
        assert!(!t.is_party("u3"));
    }

    #[test]
    fn test_default_transfer_is_pending() {
        let t = TransferDoc::default();
        assert_eq!(t.status, TransferStatus::Pending);
        assert!(t.responded_at.is_none());
        assert!(!t.id.is_empty());
        assert!(t.metadata.created_at.is_some());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Accepted.is_terminal());
        assert!(TransferStatus::Declined.is_terminal());
    }

    #[test]
    fn test_partial_index_matches_serialized_status() {
        // The partial filter compares against the serialized enum value
        let bson = bson::to_bson(&TransferStatus::Pending).unwrap();
        assert_eq!(bson.as_str(), Some("pending"));
    }
}
