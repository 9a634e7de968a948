//! Core types for the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Scan epoch that produced this report.
    pub epoch: u64,
    /// Containers listed by the inventory.
    pub scanned: usize,
    /// Records contributing to the aggregate.
    pub counted: usize,
    /// Records with a zero memory limit.
    pub flagged: usize,
    /// Containers that could not be inspected and kept their previous record.
    pub unresolved: usize,
    /// Aggregate before the replace.
    pub previous_committed: u64,
    /// Aggregate after the replace.
    pub committed: u64,
    /// Admission reservations the scan superseded.
    pub dropped_reservations: usize,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the replace was applied.
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    /// Signed change of the aggregate caused by this cycle.
    #[must_use]
    pub fn drift(&self) -> i128 {
        i128::from(self.committed).saturating_sub(i128::from(self.previous_committed))
    }

    /// Check if the cycle changed nothing.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.committed == self.previous_committed && self.dropped_reservations == 0
    }
}
