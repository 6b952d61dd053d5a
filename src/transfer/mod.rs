//! Transfer state machine
//!
//! `pending -> accepted` and `pending -> declined`, both terminal. Workflow
//! decisions are driven by the transfer's `status` alone; view-only array
//! membership only answers "who may read".

mod service;

pub use service::{Acceptance, PrivacyUpdate, TransferService};

use serde::{Deserialize, Serialize};

use crate::db::schemas::{PrivacyPreferences, TransferDoc, TransferStatus, TransferType};

/// Body of `POST /transfers`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRequest {
    #[serde(default)]
    pub to_user_id: Option<String>,

    #[serde(default)]
    pub to_user_public_id: Option<String>,

    pub animal_id: String,

    #[serde(default)]
    pub transfer_type: TransferType,

    #[serde(default)]
    pub offer_view_only: bool,

    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Owner privacy preferences as sent and returned over the API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    #[serde(default)]
    pub show_remarks_public: bool,

    #[serde(default)]
    pub show_genetic_code_public: bool,

    #[serde(default = "default_true")]
    pub show_name_public: bool,
}

fn default_true() -> bool {
    true
}

impl From<PrivacySettings> for PrivacyPreferences {
    fn from(s: PrivacySettings) -> Self {
        Self {
            show_remarks_public: s.show_remarks_public,
            show_genetic_code_public: s.show_genetic_code_public,
            show_name_public: s.show_name_public,
        }
    }
}

impl From<PrivacyPreferences> for PrivacySettings {
    fn from(p: PrivacyPreferences) -> Self {
        Self {
            show_remarks_public: p.show_remarks_public,
            show_genetic_code_public: p.show_genetic_code_public,
            show_name_public: p.show_name_public,
        }
    }
}

/// API representation of a transfer
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferView {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub transfer_type: TransferType,
    pub offer_view_only: bool,
    pub status: TransferStatus,
    pub animal_id_public: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<String>,
}

fn rfc3339(dt: bson::DateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}

impl From<&TransferDoc> for TransferView {
    fn from(t: &TransferDoc) -> Self {
        Self {
            id: t.id.clone(),
            from_user_id: t.from_user_id.clone(),
            to_user_id: t.to_user_id.clone(),
            transfer_type: t.transfer_type,
            offer_view_only: t.offer_view_only,
            status: t.status,
            animal_id_public: t.animal_id_public.clone(),
            transaction_id: t.transaction_id.clone(),
            created_at: rfc3339(t.created_at),
            responded_at: t.responded_at.map(rfc3339),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propose_request_defaults() {
        let req: ProposeRequest =
            serde_json::from_str(r#"{"toUserPublicId":"U2-PUB","animalId":"X1"}"#).unwrap();
        assert_eq!(req.to_user_public_id.as_deref(), Some("U2-PUB"));
        assert_eq!(req.transfer_type, TransferType::Sale);
        assert!(!req.offer_view_only);
        assert!(req.transaction_id.is_none());
    }

    #[test]
    fn test_privacy_settings_are_camel_case() {
        let settings: PrivacySettings =
            serde_json::from_str(r#"{"showRemarksPublic":true}"#).unwrap();
        let prefs = PrivacyPreferences::from(settings);
        assert!(prefs.show_remarks_public);
        assert!(!prefs.show_genetic_code_public);
        assert!(prefs.show_name_public);

        let json = serde_json::to_value(PrivacySettings::from(prefs)).unwrap();
        assert_eq!(json["showRemarksPublic"], true);
        assert_eq!(json["showNamePublic"], true);
        assert!(json.get("show_remarks_public").is_none());
    }

    #[test]
    fn test_transfer_view_shape() {
        let t = TransferDoc::pending("u1", "u2", "X1", TransferType::Purchase, true);
        let json = serde_json::to_value(TransferView::from(&t)).unwrap();
        assert_eq!(json["fromUserId"], "u1");
        assert_eq!(json["transferType"], "purchase");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["offerViewOnly"], true);
        assert!(json.get("respondedAt").is_none());
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
    }
}
