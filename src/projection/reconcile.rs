//! Projection reconciliation sweep
//!
//! Re-derives every public projection from the private store and repairs
//! whatever has drifted: duplicate documents per public id, stale content,
//! projections for animals that are gone or no longer public, and missing
//! projections. Running it twice in a row is a no-op the second time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::schemas::AccountDoc;
use crate::store::{project_with, LedgerStore};
use crate::types::Result;

use super::document::PublicAnimalDoc;
use super::store::ProjectionStore;

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Surplus documents removed by duplicate collapsing
    pub collapsed: usize,
    pub scanned: usize,
    pub unchanged: usize,
    pub created: usize,
    pub replaced: usize,
    pub removed: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn repaired(&self) -> usize {
        self.collapsed + self.created + self.replaced + self.removed
    }
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    projections: Arc<ProjectionStore>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerStore>, projections: Arc<ProjectionStore>) -> Self {
        Self {
            ledger,
            projections,
        }
    }

    /// Run one full sweep
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            collapsed: self.ledger.collapse_duplicate_projections().await?,
            ..Default::default()
        };
        if report.collapsed > 0 {
            self.projections.clear();
        }

        let mut existing: HashMap<String, _> = self
            .ledger
            .list_projections()
            .await?
            .into_iter()
            .map(|p| (p.id_public.clone(), p))
            .collect();

        let mut owners: HashMap<String, Option<AccountDoc>> = HashMap::new();

        for animal in self.ledger.list_animals().await? {
            report.scanned += 1;

            if !owners.contains_key(&animal.owner_id) {
                let owner = match self.ledger.find_account(&animal.owner_id).await {
                    Ok(owner) => owner,
                    Err(e) => {
                        warn!(animal = %animal.id_public, "Owner lookup failed: {}", e);
                        report.failed += 1;
                        existing.remove(&animal.id_public);
                        continue;
                    }
                };
                owners.insert(animal.owner_id.clone(), owner);
            }
            let owner = owners.get(&animal.owner_id).and_then(|o| o.as_ref());

            let expected = project_with(&animal, owner);
            let current = existing.remove(&animal.id_public);

            match (&expected, &current) {
                (Some(want), Some(have)) if want.same_content(have) => {
                    report.unchanged += 1;
                    continue;
                }
                (None, None) => {
                    report.unchanged += 1;
                    continue;
                }
                _ => {}
            }

            self.repair(&animal.id_public, current.as_ref(), &mut report)
                .await;
        }

        // Whatever is left had no live animal behind it when listed
        for (ghost, current) in existing {
            self.repair(&ghost, Some(&current), &mut report).await;
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired(),
            failed = report.failed,
            "Projection reconcile completed"
        );
        Ok(report)
    }

    /// Re-project from the records as they stand now and count the result
    /// against what the sweep found stored
    async fn repair(
        &self,
        id_public: &str,
        current: Option<&PublicAnimalDoc>,
        report: &mut ReconcileReport,
    ) {
        match self.projections.refresh(id_public).await {
            Ok(fresh) => {
                let outcome = match (&fresh, current) {
                    (Some(_), Some(_)) => Outcome::Replaced,
                    (Some(_), None) => Outcome::Created,
                    (None, Some(_)) => Outcome::Removed,
                    (None, None) => {
                        report.unchanged += 1;
                        return;
                    }
                };
                debug!(animal = %id_public, ?outcome, "Projection repaired");
                match outcome {
                    Outcome::Created => report.created += 1,
                    Outcome::Replaced => report.replaced += 1,
                    Outcome::Removed => report.removed += 1,
                }
            }
            Err(e) => {
                warn!(animal = %id_public, "Projection repair failed: {}", e);
                report.failed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Created,
    Replaced,
    Removed,
}

/// Run the reconciler on a fixed interval
pub fn spawn_reconcile_task(reconciler: Arc<Reconciler>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = reconciler.reconcile().await {
                warn!("Scheduled projection reconcile failed: {}", e);
            }
        }
    });

    info!(interval_secs = interval.as_secs(), "Projection reconcile task started");
}
