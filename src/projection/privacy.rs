//! Privacy projector
//!
//! Pure mapping from an animal plus its owner's privacy preferences to the
//! public projection document. No clocks, no randomness: identical inputs
//! always serialize to identical bytes, which is what makes replace-upserts
//! and drift detection safe.

use crate::db::schemas::{AccountDoc, AnimalDoc, PrivacyPreferences};

use super::document::PublicAnimalDoc;

/// Detail sections controlled by `section_privacy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Identity,
    Dates,
    Appearance,
    Lineage,
    Health,
    Breeding,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Dates => "dates",
            Self::Appearance => "appearance",
            Self::Lineage => "lineage",
            Self::Health => "health",
            Self::Breeding => "breeding",
        }
    }
}

/// The owner-side inputs of a projection
#[derive(Debug, Clone, Copy)]
pub struct OwnerView<'a> {
    pub public_id: &'a str,
    pub display_name: &'a str,
    pub privacy: PrivacyPreferences,
}

impl<'a> From<&'a AccountDoc> for OwnerView<'a> {
    fn from(account: &'a AccountDoc) -> Self {
        Self {
            public_id: &account.public_id,
            display_name: &account.display_name,
            privacy: account.privacy,
        }
    }
}

impl<'a> OwnerView<'a> {
    /// Used when the owner account record is unavailable: the denormalized
    /// public id with the most restrictive preferences.
    pub fn fallback(animal: &'a AnimalDoc) -> Self {
        Self {
            public_id: &animal.owner_id_public,
            display_name: "",
            privacy: PrivacyPreferences {
                show_remarks_public: false,
                show_genetic_code_public: false,
                show_name_public: false,
            },
        }
    }
}

fn section_visible(animal: &AnimalDoc, section: Section) -> bool {
    animal
        .section_privacy
        .get(section.as_str())
        .copied()
        .unwrap_or(false)
}

fn gated(visible: bool, value: &Option<String>) -> Option<String> {
    if visible {
        value.clone()
    } else {
        None
    }
}

/// Project an animal for public consumption.
///
/// Returns `None` when no projection should exist.
pub fn project(animal: &AnimalDoc, owner: &OwnerView<'_>) -> Option<PublicAnimalDoc> {
    if !animal.is_public || animal.metadata.is_deleted {
        return None;
    }

    let d = &animal.details;
    let identity = section_visible(animal, Section::Identity);
    let dates = section_visible(animal, Section::Dates);
    let appearance = section_visible(animal, Section::Appearance);
    let lineage = section_visible(animal, Section::Lineage);
    let health = section_visible(animal, Section::Health);
    let breeding = section_visible(animal, Section::Breeding);

    let show_remarks = animal.include_remarks && owner.privacy.show_remarks_public;
    let show_genetic_code = animal.include_genetic_code && owner.privacy.show_genetic_code_public;

    let owner_name = if owner.privacy.show_name_public && !owner.display_name.is_empty() {
        Some(owner.display_name.to_string())
    } else {
        None
    };

    Some(PublicAnimalDoc {
        mongo_id: animal.id_public.clone(),
        id_public: animal.id_public.clone(),
        species: animal.species.clone(),
        owner_id_public: owner.public_id.to_string(),
        owner_name,
        name: gated(identity, &d.name),
        gender: gated(identity, &d.gender),
        birth_date: gated(dates, &d.birth_date),
        deceased_date: gated(dates, &d.deceased_date),
        color: gated(appearance, &d.color),
        coat: gated(appearance, &d.coat),
        markings: gated(appearance, &d.markings),
        sire_id_public: gated(lineage, &d.sire_id_public),
        dam_id_public: gated(lineage, &d.dam_id_public),
        breeder_id_public: gated(lineage, &d.breeder_id_public),
        health_notes: gated(health, &d.health_notes),
        breeding_status: gated(breeding, &d.breeding_status),
        remarks: gated(show_remarks, &d.remarks),
        genetic_code: gated(show_genetic_code, &d.genetic_code),
        metadata: Default::default(),
    })
}
