//! Account document schema
//!
//! Only the slice of an account the transfer subsystem needs: public
//! identity, privacy preferences feeding the projector, and the set of
//! animals the account owns.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Owner-level privacy preferences applied to every projection of the
/// owner's animals
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrivacyPreferences {
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

impl Default for PrivacyPreferences {
    fn default() -> Self {
        Self {
            show_remarks_public: false,
            show_genetic_code_public: false,
            show_name_public: true,
        }
    }
}

/// Account document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AccountDoc {
    /// Account identifier (as resolved by the auth middleware)
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Public identifier shown on projections
    pub public_id: String,

    /// Breeder / kennel display name
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub privacy: PrivacyPreferences,

    /// Public ids of animals this account owns
    #[serde(default)]
    pub owned_animals: Vec<String>,
}

impl AccountDoc {
    pub fn new(
        id: impl Into<String>,
        public_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            metadata: Metadata::new(),
            public_id: public_id.into(),
            display_name: display_name.into(),
            privacy: PrivacyPreferences::default(),
            owned_animals: Vec::new(),
        }
    }

    pub fn with_privacy(mut self, privacy: PrivacyPreferences) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn owns(&self, animal_id_public: &str) -> bool {
        self.owned_animals.iter().any(|a| a == animal_id_public)
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "public_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("public_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
