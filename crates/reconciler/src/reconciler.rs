//! Reconciler implementation.
//!
//! A full inventory scan is the authoritative correction for drift: missed,
//! duplicated, or reordered events, and a dead event stream.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use memgate_core::{
    ContainerInventory, ContainerRecord, ContainerSummary, InventorySnapshot, Ledger,
    ManagedNaming,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::ReconcileReport;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Naming convention of orchestrator-owned containers.
    pub naming: ManagedNaming,
    /// Maximum concurrent inspect calls during a scan.
    pub inspect_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            naming: ManagedNaming::default(),
            inspect_concurrency: 8,
        }
    }
}

enum Inspected {
    Record(ContainerRecord),
    Vanished,
    Unresolved(ContainerSummary),
}

/// Rebuilds the ledger from a full inventory scan.
pub struct Reconciler {
    ledger: Arc<Ledger>,
    inventory: Arc<dyn ContainerInventory>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        ledger: Arc<Ledger>,
        inventory: Arc<dyn ContainerInventory>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            inventory,
            config,
        }
    }

    /// List and inspect every container, stopped ones included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListingFailed`] if the listing call fails. Individual
    /// inspect failures do not fail the scan.
    pub async fn scan(&self) -> Result<InventorySnapshot> {
        let containers = self
            .inventory
            .list_containers(true)
            .await
            .map_err(Error::from)?;

        let inspected: Vec<Inspected> = stream::iter(containers)
            .map(|summary| self.inspect(summary))
            .buffer_unordered(self.config.inspect_concurrency.max(1))
            .collect()
            .await;

        let mut snapshot = InventorySnapshot::new();
        for outcome in inspected {
            match outcome {
                Inspected::Record(record) => snapshot.records.push(record),
                Inspected::Unresolved(summary) => snapshot.unresolved.push(summary.id),
                Inspected::Vanished => {}
            }
        }
        snapshot.records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshot)
    }

    async fn inspect(&self, summary: ContainerSummary) -> Inspected {
        let details = match self.inventory.inspect_container(&summary.id).await {
            Ok(details) => details,
            Err(memgate_core::Error::ContainerNotFound { .. }) => {
                debug!(container_id = %summary.id.short(), "Container vanished during scan");
                return Inspected::Vanished;
            }
            Err(e) => {
                warn!(
                    container_id = %summary.id.short(),
                    error = %e,
                    "Inspect failed during scan; keeping previous record"
                );
                return Inspected::Unresolved(summary);
            }
        };

        let managed = self.config.naming.is_managed(&details.name)
            || self.config.naming.is_managed(&summary.name);
        let counted = !(managed && !summary.state.is_running());

        if details.memory_limit == 0 {
            warn!(
                container_id = %summary.id.short(),
                name = %details.name,
                "Container has no memory limit; it is tracked but adds nothing to the aggregate"
            );
        }

        Inspected::Record(ContainerRecord {
            id: summary.id,
            committed_memory: details.memory_limit,
            counted,
            managed,
            flagged: details.memory_limit == 0,
        })
    }

    /// Scan the inventory and replace the ledger with the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListingFailed`] if the listing failed, and
    /// [`Error::Superseded`] if a newer scan was applied first. In both
    /// cases the ledger is left as it was.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let ticket = self.ledger.begin_scan().await;
        info!(epoch = ticket.epoch(), "Starting periodic count");

        let snapshot = match self.scan().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(epoch = ticket.epoch(), error = %e, "Reconciliation skipped");
                return Err(e);
            }
        };

        let (counted, uncounted): (Vec<_>, Vec<_>) =
            snapshot.records.iter().partition(|r| r.counted);
        let scanned = snapshot
            .records
            .len()
            .saturating_add(snapshot.unresolved.len());
        let flagged = snapshot.flagged_count();
        let unresolved = snapshot.unresolved.len();
        let counted_len = counted.len();

        debug!(
            counted = counted_len,
            uncounted = uncounted.len(),
            managed_stopped = uncounted.iter().filter(|r| r.managed).count(),
            ids = %counted.iter().map(|r| r.id.short()).join(","),
            "Scan complete"
        );

        let outcome = self.ledger.replace(ticket, snapshot).await?;
        let report = ReconcileReport {
            epoch: ticket.epoch(),
            scanned,
            counted: counted_len,
            flagged,
            unresolved,
            previous_committed: outcome.previous_committed,
            committed: outcome.committed,
            dropped_reservations: outcome.dropped_reservations,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            epoch = report.epoch,
            scanned = report.scanned,
            flagged = report.flagged,
            unresolved = report.unresolved,
            committed = report.committed,
            drift = %report.drift(),
            "Current memory used"
        );
        Ok(report)
    }
}
