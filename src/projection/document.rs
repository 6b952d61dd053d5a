//! Public projection document
//!
//! The privacy-filtered mirror of an animal. `_id` is the animal's public
//! identifier, so a replace-with-upsert can never create a second document
//! for the same animal.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for public projections
pub const PUBLIC_ANIMAL_COLLECTION: &str = "public_animals";

/// Projected animal document
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PublicAnimalDoc {
    /// MongoDB document ID (the animal's public id)
    #[serde(rename = "_id")]
    pub mongo_id: String,

    pub id_public: String,

    pub species: String,

    /// Public id of the current owner, re-derived on every ownership change
    pub owner_id_public: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,

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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genetic_code: Option<String>,

    /// Standard metadata (soft delete, timestamps)
    #[serde(default)]
    pub metadata: Metadata,
}

impl PublicAnimalDoc {
    /// Compare projected content, ignoring write timestamps
    pub fn same_content(&self, other: &PublicAnimalDoc) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.metadata = Metadata::default();
        b.metadata = Metadata::default();
        a == b
    }
}

impl IntoIndexes for PublicAnimalDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Guards legacy documents whose _id is not the public id
            (
                doc! { "id_public": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("projection_id_public_unique".to_string())
                        .build(),
                ),
            ),
            (doc! { "owner_id_public": 1 }, None),
            (doc! { "species": 1 }, None),
        ]
    }
}

impl MutMetadata for PublicAnimalDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
