//! Projection Store - cached access to public projections
//!
//! A DashMap hot cache in front of the ledger store's projection
//! collection. Reads check the hot cache first, then the ledger store.
//! Writes go to the ledger store first and only then to the cache, so the
//! cache never holds a projection that was not committed.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::store::LedgerStore;
use crate::types::Result;

use super::document::PublicAnimalDoc;

/// Hot cache entry for projected documents
#[derive(Debug, Clone)]
struct HotCacheEntry {
    doc: PublicAnimalDoc,
    cached_at: Instant,
}

impl HotCacheEntry {
    fn new(doc: PublicAnimalDoc) -> Self {
        Self {
            doc,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl_secs: u64) -> bool {
        self.cached_at.elapsed().as_secs() >= ttl_secs
    }
}

/// Projection store configuration
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Maximum entries in hot cache
    pub max_hot_cache_entries: usize,

    /// Hot cache TTL in seconds
    pub hot_cache_ttl_secs: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_hot_cache_entries: 10_000,
            hot_cache_ttl_secs: 300, // 5 minutes
        }
    }
}

/// Projection Store
///
/// Architecture:
/// - Hot cache (DashMap) for public reads
/// - Ledger store for persistence (same transaction as ownership changes)
pub struct ProjectionStore {
    hot_cache: DashMap<String, HotCacheEntry>,
    ledger: Arc<dyn LedgerStore>,
    config: ProjectionConfig,
}

impl ProjectionStore {
    pub fn new(ledger: Arc<dyn LedgerStore>, config: ProjectionConfig) -> Self {
        debug!(
            max_entries = config.max_hot_cache_entries,
            ttl_secs = config.hot_cache_ttl_secs,
            "ProjectionStore initialized"
        );
        Self {
            hot_cache: DashMap::new(),
            ledger,
            config,
        }
    }

    /// Get the public projection of an animal
    ///
    /// Checks hot cache first, then the ledger store.
    pub async fn get(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        if let Some(entry) = self.hot_cache.get(id_public) {
            if !entry.is_expired(self.config.hot_cache_ttl_secs) {
                debug!("Hot cache hit for {}", id_public);
                return Ok(Some(entry.doc.clone()));
            }
            drop(entry);
            self.hot_cache.remove(id_public);
        }

        let found = self.ledger.find_projection(id_public).await?;
        if let Some(doc) = &found {
            self.hot_cache
                .insert(id_public.to_string(), HotCacheEntry::new(doc.clone()));
            self.evict_if_needed();
        }
        Ok(found)
    }

    /// Record a committed projection in the hot cache
    pub fn publish(&self, id_public: &str, projection: Option<&PublicAnimalDoc>) {
        match projection {
            Some(doc) => {
                self.hot_cache
                    .insert(id_public.to_string(), HotCacheEntry::new(doc.clone()));
                self.evict_if_needed();
            }
            None => {
                self.hot_cache.remove(id_public);
            }
        }
    }

    /// Re-project an animal outside a transfer and persist the result.
    ///
    /// The ledger re-reads the animal and its owner inside the write, so a
    /// transfer committed meanwhile is reflected rather than undone. The
    /// cached copy is evicted, not replaced: a resolution committing after
    /// this write may already have published a newer one.
    pub async fn refresh(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        let projection = self.ledger.reproject(id_public).await?;
        self.publish(id_public, None);
        Ok(projection)
    }

    /// Drop every cached projection
    pub fn clear(&self) {
        self.hot_cache.clear();
    }

    /// Get hot cache statistics
    pub fn hot_cache_stats(&self) -> HotCacheStats {
        let total = self.hot_cache.len();
        let expired = self
            .hot_cache
            .iter()
            .filter(|entry| entry.is_expired(self.config.hot_cache_ttl_secs))
            .count();

        HotCacheStats {
            total_entries: total,
            expired_entries: expired,
            max_entries: self.config.max_hot_cache_entries,
        }
    }

    /// Evict oldest entries if hot cache is over capacity
    fn evict_if_needed(&self) {
        if self.hot_cache.len() <= self.config.max_hot_cache_entries {
            return;
        }

        // Expired entries go first
        let expired_keys: Vec<String> = self
            .hot_cache
            .iter()
            .filter(|entry| entry.is_expired(self.config.hot_cache_ttl_secs))
            .map(|entry| entry.key().clone())
            .collect();

        for key in expired_keys {
            self.hot_cache.remove(&key);
        }

        // Still over capacity: oldest first
        while self.hot_cache.len() > self.config.max_hot_cache_entries {
            let oldest = self
                .hot_cache
                .iter()
                .min_by_key(|entry| entry.cached_at)
                .map(|entry| entry.key().clone());

            if let Some(key) = oldest {
                self.hot_cache.remove(&key);
            } else {
                break;
            }
        }
    }
}

/// Hot cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct HotCacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{AccountDoc, AnimalDoc};
    use crate::store::MemoryLedgerStore;

    fn doc(id: &str) -> PublicAnimalDoc {
        PublicAnimalDoc {
            mongo_id: id.into(),
            id_public: id.into(),
            species: "cat".into(),
            owner_id_public: "U1-PUB".into(),
            ..Default::default()
        }
    }

    fn store(config: ProjectionConfig) -> (Arc<MemoryLedgerStore>, ProjectionStore) {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let projections = ProjectionStore::new(ledger.clone(), config);
        (ledger, projections)
    }

    #[tokio::test]
    async fn test_get_falls_through_to_ledger_and_caches() {
        let (ledger, projections) = store(ProjectionConfig::default());
        ledger.put_projection(doc("X1")).await;

        let found = projections.get("X1").await.unwrap();
        assert_eq!(found.unwrap().id_public, "X1");
        assert_eq!(projections.hot_cache_stats().total_entries, 1);

        assert!(projections.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_none_evicts() {
        let (_, projections) = store(ProjectionConfig::default());
        projections.publish("X1", Some(&doc("X1")));
        assert!(projections.get("X1").await.unwrap().is_some());

        projections.publish("X1", None);
        assert!(projections.get("X1").await.unwrap().is_none());
    }

    #[test]
    fn test_capacity_eviction() {
        let (_, projections) = store(ProjectionConfig {
            max_hot_cache_entries: 2,
            hot_cache_ttl_secs: 300,
        });
        projections.publish("A", Some(&doc("A")));
        projections.publish("B", Some(&doc("B")));
        projections.publish("C", Some(&doc("C")));
        assert_eq!(projections.hot_cache_stats().total_entries, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reads_through() {
        let (ledger, projections) = store(ProjectionConfig {
            max_hot_cache_entries: 10,
            hot_cache_ttl_secs: 0,
        });
        projections.publish("X1", Some(&doc("X1")));
        // Cached entry is already expired and the ledger has nothing
        assert!(projections.get("X1").await.unwrap().is_none());

        ledger.put_projection(doc("X1")).await;
        assert!(projections.get("X1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_writes_through() {
        let (ledger, projections) = store(ProjectionConfig::default());
        ledger
            .insert_account(AccountDoc::new("u1", "U1-PUB", "Seller"))
            .await
            .unwrap();
        let mut animal = AnimalDoc::new("X1", "cat", "u1", "U1-PUB");
        animal.is_public = true;
        ledger.insert_animal(animal).await.unwrap();

        projections.publish("X1", Some(&doc("X1")));
        let projected = projections.refresh("X1").await.unwrap();
        assert_eq!(projected.unwrap().owner_id_public, "U1-PUB");
        assert_eq!(projections.hot_cache_stats().total_entries, 0);
        assert!(ledger.find_projection("X1").await.unwrap().is_some());
        assert!(projections.get("X1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_of_missing_animal_evicts() {
        let (ledger, projections) = store(ProjectionConfig::default());
        ledger.put_projection(doc("X1")).await;
        projections.publish("X1", Some(&doc("X1")));

        assert!(projections.refresh("X1").await.unwrap().is_none());
        assert!(ledger.find_projection("X1").await.unwrap().is_none());
        assert!(projections.get("X1").await.unwrap().is_none());
    }
}
