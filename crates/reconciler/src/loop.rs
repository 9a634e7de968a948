//! Periodic reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::types::ReconcileReport;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between reconciliation cycles.
    pub interval: Duration,
    /// Whether to run a cycle as soon as the loop starts.
    pub run_immediately: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            run_immediately: true,
        }
    }
}

impl LoopConfig {
    /// Check that the interval is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero interval.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("reconcile interval must be non-zero"));
        }
        Ok(())
    }
}

/// Counters collected over the life of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Cycles attempted.
    pub cycles: u64,
    /// Cycles that failed and were skipped.
    pub failures: u64,
}

/// Continuous reconciliation loop.
///
/// Runs a full reconcile every interval until stopped. A failed cycle is
/// logged and the loop carries on; the next tick retries.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
    stats_tx: watch::Sender<LoopStats>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(reconciler: Arc<Reconciler>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (stats_tx, _) = watch::channel(LoopStats::default());
        Self {
            reconciler,
            config,
            stop_rx,
            stop_tx,
            stats_tx,
        }
    }

    /// Run the reconciliation loop until stopped.
    pub async fn run(&mut self) -> LoopStats {
        info!(
            interval_ms = self.config.interval.as_millis(),
            run_immediately = self.config.run_immediately,
            "Starting reconciliation loop"
        );

        let period = self.config.interval.max(Duration::from_millis(1));
        let now = Instant::now();
        let start = if self.config.run_immediately {
            now
        } else {
            now.checked_add(period).unwrap_or(now)
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stats = LoopStats::default();
        if *self.stop_rx.borrow() {
            info!("Reconciliation loop stopped");
            return stats;
        }

        loop {
            tokio::select! {
                biased;
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!(cycles = stats.cycles, failures = stats.failures, "Reconciliation loop stopped");
                        return stats;
                    }
                }
                _ = interval.tick() => {
                    stats.cycles = stats.cycles.saturating_add(1);
                    match self.reconcile_once().await {
                        Ok(report) if report.converged() => debug!(epoch = report.epoch, "Ledger converged"),
                        Ok(report) => debug!(epoch = report.epoch, drift = %report.drift(), "Ledger corrected"),
                        Err(e) => {
                            stats.failures = stats.failures.saturating_add(1);
                            error!(error = %e, failures = stats.failures, "Reconciliation error");
                        }
                    }
                    self.stats_tx.send_replace(stats);
                }
            }
        }
    }

    /// Run a single reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Propagates the reconciler's error for a skipped cycle.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile().await
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// A receiver that observes stats after each completed cycle.
    pub fn watch_stats(&self) -> watch::Receiver<LoopStats> {
        self.stats_tx.subscribe()
    }

    /// Run the loop on a background task.
    pub fn spawn(mut self) -> LoopHandle {
        let stopper = self.stopper();
        let stats_rx = self.watch_stats();
        let task = tokio::spawn(async move { self.run().await });
        LoopHandle {
            stopper,
            stats_rx,
            task,
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

/// Handle to a spawned reconciliation loop.
pub struct LoopHandle {
    stopper: LoopStopper,
    stats_rx: watch::Receiver<LoopStats>,
    task: JoinHandle<LoopStats>,
}

impl LoopHandle {
    /// Signal the loop to stop.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        self.stopper.clone()
    }

    /// Stats as of the last completed cycle.
    pub fn stats(&self) -> LoopStats {
        *self.stats_rx.borrow()
    }

    /// A receiver that observes stats after each completed cycle.
    pub fn watch_stats(&self) -> watch::Receiver<LoopStats> {
        self.stats_rx.clone()
    }

    /// Check if the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<LoopStats> {
        self.task.await.map_err(|e| Error::task_failed(e.to_string()))
    }
}
