//! The admission engine facade.
//!
//! Owns the shared ledger and wires the gate, ingestor and reconciler to it.
//! Capacity is queried and the background tasks are started on the first
//! admission call, exactly once. Initialization and shutdown are serialized,
//! so a shutdown that lands mid-initialization still stops the tasks it
//! started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use memgate_core::{ContainerInventory, Ledger, ResourceInventory, Transition};
use memgate_events::{EventIngestor, EventSource, IngestorHandle, IngestorStatus, LifecycleEvent};
use memgate_reconciler::{LoopHandle, LoopStats, ReconcileReport, Reconciler, ReconciliationLoop};
use tokio::sync::{Mutex, OnceCell, watch};
use tracing::{debug, info, warn};

use crate::capacity::CapacitySource;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gate::{AdmissionGate, Verdict};
use crate::request::AdmissionRequest;

/// Background tasks started by initialization.
struct Tasks {
    ingestor: IngestorHandle,
    reconciliation: LoopHandle,
}

/// State established by the one-time initialization.
struct Runtime {
    capacity: u64,
    ingestor_status: watch::Receiver<IngestorStatus>,
    reconciliation_stats: watch::Receiver<LoopStats>,
    tasks: Mutex<Option<Tasks>>,
}

/// Host-wide memory admission quota.
pub struct AdmissionEngine {
    config: EngineConfig,
    ledger: Arc<Ledger>,
    capacity_source: CapacitySource,
    gate: AdmissionGate,
    ingestor: Arc<EventIngestor>,
    reconciler: Arc<Reconciler>,
    events: Arc<dyn EventSource>,
    runtime: OnceCell<Runtime>,
    /// Held across initialization and by shutdown.
    lifecycle: Mutex<()>,
    closed: AtomicBool,
}

impl AdmissionEngine {
    /// Create an engine over its three collaborators.
    ///
    /// Nothing is queried or spawned until the first admission call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        resources: Arc<dyn ResourceInventory>,
        containers: Arc<dyn ContainerInventory>,
        events: Arc<dyn EventSource>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::new());
        let ingestor = Arc::new(EventIngestor::new(
            ledger.clone(),
            containers.clone(),
            config.naming(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            containers,
            config.reconciler_config(),
        ));
        Ok(Self {
            gate: AdmissionGate::new(ledger.clone(), &config),
            capacity_source: CapacitySource::new(resources),
            config,
            ledger,
            ingestor,
            reconciler,
            events,
            runtime: OnceCell::new(),
            lifecycle: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Decide a creation request for `requested` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityUnavailable`] (fatal) if initialization
    /// failed, or [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn evaluate(&self, requested: u64) -> Result<Verdict> {
        let capacity = self.ensure_started().await?.capacity;
        Ok(self.gate.evaluate(requested, capacity).await)
    }

    /// Decide an intercepted runtime call.
    ///
    /// # Errors
    ///
    /// Same as [`evaluate`](Self::evaluate).
    pub async fn authorize_request(&self, request: &AdmissionRequest) -> Result<Verdict> {
        let capacity = self.ensure_started().await?.capacity;
        Ok(self.gate.authorize_request(request, capacity).await)
    }

    /// Decide a completed call on its way back. Always allows.
    #[must_use]
    pub const fn authorize_response(&self, request: &AdmissionRequest) -> Verdict {
        self.gate.authorize_response(request)
    }

    /// Apply one lifecycle event directly, bypassing the subscription.
    pub async fn on_lifecycle_event(&self, event: &LifecycleEvent) -> Transition {
        self.ingestor.apply(event).await
    }

    /// Run one reconciliation cycle now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reconcile`] if the cycle was skipped; the ledger is
    /// left as it was.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        Ok(self.reconciler.reconcile().await?)
    }

    async fn ensure_started(&self) -> Result<&Runtime> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }

        let _lifecycle = self.lifecycle.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        self.runtime.get_or_try_init(|| self.start()).await
    }

    async fn start(&self) -> Result<Runtime> {
        let capacity = self.capacity_source.query().await?;

        let ingestor = self.ingestor.clone().spawn(self.events.clone());
        let reconciliation =
            ReconciliationLoop::new(self.reconciler.clone(), self.config.loop_config()).spawn();
        info!(
            capacity,
            interval_secs = self.config.reconcile_interval_secs,
            managed_prefix = %self.config.managed_name_prefix,
            "Admission engine started"
        );

        Ok(Runtime {
            capacity,
            ingestor_status: ingestor.watch_status(),
            reconciliation_stats: reconciliation.watch_stats(),
            tasks: Mutex::new(Some(Tasks {
                ingestor,
                reconciliation,
            })),
        })
    }

    /// Stop the background tasks and wait for them to exit.
    ///
    /// Later admission calls return [`Error::ShutDown`]. Calling this more
    /// than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if a background task panicked.
    pub async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        // Waits out an initialization in flight; none can begin after this.
        let _lifecycle = self.lifecycle.lock().await;
        let Some(runtime) = self.runtime.get() else {
            debug!("Admission engine shut down before it started");
            return Ok(());
        };
        let Some(tasks) = runtime.tasks.lock().await.take() else {
            return Ok(());
        };

        tasks.ingestor.stop();
        tasks.reconciliation.stop();
        let status = tasks.ingestor.join().await?;
        let stats = tasks.reconciliation.join().await?;
        info!(
            ingestor = %status,
            cycles = stats.cycles,
            failed_cycles = stats.failures,
            "Admission engine stopped"
        );
        Ok(())
    }

    /// Host capacity, once established.
    #[must_use]
    pub fn capacity(&self) -> Option<u64> {
        self.runtime.get().map(|runtime| runtime.capacity)
    }

    /// Current aggregate committed memory.
    pub async fn committed(&self) -> u64 {
        self.ledger.committed().await
    }

    /// Latest status of the event ingestion task.
    ///
    /// A terminated ingestor leaves the engine on reconciliation-only accuracy.
    #[must_use]
    pub fn ingestor_status(&self) -> IngestorStatus {
        self.runtime.get().map_or(IngestorStatus::Idle, |runtime| {
            let status = runtime.ingestor_status.borrow().clone();
            if status.is_terminated() {
                warn!(status = %status, "Event ingestion is down");
            }
            status
        })
    }

    /// Counters of the periodic reconciliation loop.
    #[must_use]
    pub fn reconciliation_stats(&self) -> LoopStats {
        self.runtime
            .get()
            .map_or_else(LoopStats::default, |runtime| *runtime.reconciliation_stats.borrow())
    }

    /// The shared ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
