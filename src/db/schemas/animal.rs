//! Animal document schema
//!
//! The private, authoritative pedigree record. Exactly one account owns an
//! animal at any time; former owners keep read access through
//! `view_only_for_users`.

use std::collections::BTreeMap;

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for animals
pub const ANIMAL_COLLECTION: &str = "animals";

/// Why ownership last changed. Independent of the transfer ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SoldStatus {
    #[default]
    None,
    Sold,
    Purchased,
}

impl SoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sold => "sold",
            Self::Purchased => "purchased",
        }
    }
}

/// Biological, medical and lineage payload.
///
/// Which of these reach the public projection is decided by the privacy
/// projector from `section_privacy` and the owner toggles.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AnimalDetails {
    // identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    // dates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deceased_date: Option<String>,

    // appearance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markings: Option<String>,

    // lineage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sire_id_public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dam_id_public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breeder_id_public: Option<String>,

    // health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_notes: Option<String>,

    // breeding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breeding_status: Option<String>,

    /// Free-text remarks, gated by `include_remarks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,

    /// Genetic code string, gated by `include_genetic_code`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genetic_code: Option<String>,
}

/// Animal document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AnimalDoc {
    /// Internal identifier
    #[serde(rename = "_id")]
    pub id: String,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable public identifier, immutable once assigned
    pub id_public: String,

    pub species: String,

    /// Current owner account id
    pub owner_id: String,

    /// Current owner's public id (denormalized, moves with `owner_id`)
    pub owner_id_public: String,

    /// First owner recorded by a transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_owner_id: Option<String>,

    /// Accounts holding read access without ownership
    #[serde(default)]
    pub view_only_for_users: Vec<String>,

    #[serde(default)]
    pub sold_status: SoldStatus,

    /// Top-level public-visibility flag
    #[serde(default)]
    pub is_public: bool,

    /// Section name -> publicly visible
    #[serde(default)]
    pub section_privacy: BTreeMap<String, bool>,

    #[serde(default)]
    pub include_remarks: bool,

    #[serde(default)]
    pub include_genetic_code: bool,

    #[serde(default)]
    pub details: AnimalDetails,
}

impl AnimalDoc {
    /// Create a new, private animal owned by `owner_id`
    pub fn new(
        id_public: impl Into<String>,
        species: impl Into<String>,
        owner_id: impl Into<String>,
        owner_id_public: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            id_public: id_public.into(),
            species: species.into(),
            owner_id: owner_id.into(),
            owner_id_public: owner_id_public.into(),
            ..Default::default()
        }
    }

    pub fn is_owned_by(&self, account_id: &str) -> bool {
        self.owner_id == account_id
    }

    pub fn has_view_only(&self, account_id: &str) -> bool {
        self.view_only_for_users.iter().any(|u| u == account_id)
    }

    /// Owner or view-only member
    pub fn can_read(&self, account_id: &str) -> bool {
        self.is_owned_by(account_id) || self.has_view_only(account_id)
    }

    /// Add-if-absent. Returns true if the account was newly added.
    pub fn grant_view_only(&mut self, account_id: &str) -> bool {
        if self.has_view_only(account_id) {
            return false;
        }
        self.view_only_for_users.push(account_id.to_string());
        true
    }

    /// Explicit removal. Returns true if the account was present.
    pub fn revoke_view_only(&mut self, account_id: &str) -> bool {
        let before = self.view_only_for_users.len();
        self.view_only_for_users.retain(|u| u != account_id);
        before != self.view_only_for_users.len()
    }

    /// Minimal ownership summary returned with transfer responses
    pub fn summary(&self) -> AnimalSummary {
        AnimalSummary {
            id_public: self.id_public.clone(),
            owner_id: self.owner_id.clone(),
            owner_id_public: self.owner_id_public.clone(),
            sold_status: self.sold_status,
            view_only_for_users: self.view_only_for_users.clone(),
        }
    }
}

/// Ownership summary of an animal
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnimalSummary {
    pub id_public: String,
    pub owner_id: String,
    pub owner_id_public: String,
    pub sold_status: SoldStatus,
    pub view_only_for_users: Vec<String>,
}

impl IntoIndexes for AnimalDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id_public": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("id_public_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "owner_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "view_only_for_users": 1 },
                Some(
                    IndexOptions::builder()
                        .name("view_only_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AnimalDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
