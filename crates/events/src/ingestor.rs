//! Event ingestor: applies lifecycle events to the ledger as they arrive.
//!
//! | Event   | Unmanaged                         | Managed                              |
//! |---------|-----------------------------------|--------------------------------------|
//! | create  | record, counted if inspected      | record, counted if inspected         |
//! | destroy | uncount if counted, remove record | remove record                        |
//! | die     | no-op                             | uncount if counted                   |
//! | start   | no-op                             | count if not counted                 |
//!
//! Inspect calls happen before the ledger lock is taken. When the stream
//! ends or fails, ingestion stops for good and accounting falls back to the
//! reconciler alone.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use memgate_core::{
    ContainerDetails, ContainerId, ContainerInventory, ContainerRecord, Ledger, ManagedNaming,
    Transition,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::EventSource;
use crate::error::{Error, Result};
use crate::event::{EventKind, LifecycleEvent};

/// Lifecycle of an ingestion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestorStatus {
    /// Not started yet.
    Idle,
    /// Consuming events.
    Running,
    /// Stopped on request.
    Stopped,
    /// The stream ended or failed; no further events will be applied.
    Terminated { reason: String },
}

impl IngestorStatus {
    /// Check if the ingestor ended without being asked to.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl fmt::Display for IngestorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated { reason } => write!(f, "terminated: {reason}"),
        }
    }
}

/// Applies lifecycle events to the shared ledger.
pub struct EventIngestor {
    ledger: Arc<Ledger>,
    inventory: Arc<dyn ContainerInventory>,
    naming: ManagedNaming,
}

impl EventIngestor {
    /// Create a new ingestor.
    pub fn new(
        ledger: Arc<Ledger>,
        inventory: Arc<dyn ContainerInventory>,
        naming: ManagedNaming,
    ) -> Self {
        Self {
            ledger,
            inventory,
            naming,
        }
    }

    /// Apply one event. Duplicates and out-of-order events are tolerated.
    ///
    /// Events about networks, volumes and other non-container objects are
    /// ignored; their ids live in a different namespace.
    pub async fn apply(&self, event: &LifecycleEvent) -> Transition {
        if !event.is_container() {
            debug!(
                object = %event.object,
                kind = %event.kind,
                "Ignored non-container event"
            );
            return Transition::Unchanged;
        }

        let transition = match &event.kind {
            EventKind::Create => self.apply_create(event).await,
            EventKind::Start => self.apply_start(event).await,
            EventKind::Die => self.ledger.record_died(&event.id).await,
            EventKind::Destroy => self.apply_destroy(event).await,
            EventKind::Other(_) => Transition::Unchanged,
        };

        debug!(
            container_id = %event.id.short(),
            kind = %event.kind,
            transition = ?transition,
            "Applied lifecycle event"
        );
        transition
    }

    async fn apply_create(&self, event: &LifecycleEvent) -> Transition {
        let details = self.inspect(&event.id).await;
        let managed = self.is_managed(event, details.as_ref());
        self.ledger
            .record_created(&event.id, managed, details.map(|d| d.memory_limit))
            .await
    }

    async fn apply_start(&self, event: &LifecycleEvent) -> Transition {
        let known = self.ledger.record(&event.id).await;
        let managed_hint = known
            .as_ref()
            .map(|r| r.managed)
            .or_else(|| event.name().map(|name| self.naming.is_managed(name)));

        if managed_hint == Some(false) || known.as_ref().is_some_and(|r| r.counted) {
            return Transition::Unchanged;
        }

        let details = if known.as_ref().is_none_or(ContainerRecord::needs_inspection) {
            self.inspect(&event.id).await
        } else {
            None
        };
        let managed = managed_hint.unwrap_or_else(|| {
            details
                .as_ref()
                .is_some_and(|d| self.naming.is_managed(&d.name))
        });

        self.ledger
            .record_started(&event.id, managed, details.map(|d| d.memory_limit))
            .await
    }

    async fn apply_destroy(&self, event: &LifecycleEvent) -> Transition {
        let was_managed = self
            .ledger
            .record(&event.id)
            .await
            .is_some_and(|r| r.managed);
        let transition = self.ledger.record_destroyed(&event.id).await;
        if was_managed && matches!(transition, Transition::Uncounted { .. }) {
            warn!(
                container_id = %event.id.short(),
                "Managed container destroyed while still counted; its die event was missed"
            );
        }
        transition
    }

    async fn inspect(&self, id: &ContainerId) -> Option<ContainerDetails> {
        match self.inventory.inspect_container(id).await {
            Ok(details) => Some(details),
            Err(e) => {
                warn!(
                    container_id = %id.short(),
                    error = %e,
                    "Inspect failed; container left uncounted until next reconciliation"
                );
                None
            }
        }
    }

    fn is_managed(&self, event: &LifecycleEvent, details: Option<&ContainerDetails>) -> bool {
        event
            .name()
            .or_else(|| details.map(|d| d.name.as_str()))
            .is_some_and(|name| self.naming.is_managed(name))
    }

    /// Consume `source` until stopped or until the stream ends or fails.
    ///
    /// Status changes are published on `status`; the final status is returned.
    pub async fn run(
        &self,
        source: &dyn EventSource,
        mut stop: watch::Receiver<bool>,
        status: &watch::Sender<IngestorStatus>,
    ) -> IngestorStatus {
        if *stop.borrow() {
            status.send_replace(IngestorStatus::Stopped);
            return IngestorStatus::Stopped;
        }

        let mut stream = match source.subscribe().await {
            Ok(stream) => stream,
            Err(e) => return Self::finish(status, IngestorStatus::Terminated {
                reason: e.to_string(),
            }),
        };

        status.send_replace(IngestorStatus::Running);
        info!("Event ingestion started");

        let outcome = loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break IngestorStatus::Stopped;
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        self.apply(&event).await;
                    }
                    Some(Err(e)) => {
                        break IngestorStatus::Terminated { reason: e.to_string() };
                    }
                    None => {
                        break IngestorStatus::Terminated {
                            reason: "event stream ended".to_string(),
                        };
                    }
                },
            }
        };

        Self::finish(status, outcome)
    }

    fn finish(status: &watch::Sender<IngestorStatus>, outcome: IngestorStatus) -> IngestorStatus {
        match &outcome {
            IngestorStatus::Terminated { reason } => error!(
                reason = %reason,
                "Event ingestion terminated; accounting relies on reconciliation only"
            ),
            _ => info!(status = %outcome, "Event ingestion finished"),
        }
        status.send_replace(outcome.clone());
        outcome
    }

    /// Spawn the ingestion loop on the current runtime.
    pub fn spawn(self: Arc<Self>, source: Arc<dyn EventSource>) -> IngestorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(IngestorStatus::Idle);
        let task = tokio::spawn(async move { self.run(source.as_ref(), stop_rx, &status_tx).await });
        IngestorHandle {
            stop_tx,
            status_rx,
            task,
        }
    }
}

/// Handle to a spawned ingestion task.
pub struct IngestorHandle {
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<IngestorStatus>,
    task: JoinHandle<IngestorStatus>,
}

impl IngestorHandle {
    /// Ask the task to stop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> IngestorStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that observes status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<IngestorStatus> {
        self.status_rx.clone()
    }

    /// Check if the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<IngestorStatus> {
        self.task
            .await
            .map_err(|e| Error::task_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use memgate_core::{ContainerState, InMemoryInventory};

    use super::*;
    use crate::bus::EventBus;
    use crate::event::ObjectKind;

    fn setup() -> (Arc<Ledger>, Arc<InMemoryInventory>, EventIngestor) {
        let ledger = Arc::new(Ledger::new());
        let inventory = Arc::new(InMemoryInventory::new(10_000));
        let ingestor = EventIngestor::new(
            ledger.clone(),
            inventory.clone(),
            ManagedNaming::default(),
        );
        (ledger, inventory, ingestor)
    }

    #[tokio::test]
    async fn test_unmanaged_create_and_destroy() {
        let (ledger, inventory, ingestor) = setup();
        inventory.upsert("a", "web", ContainerState::Running, 300).await;

        let created = ingestor.apply(&LifecycleEvent::created("a", "web")).await;
        assert_eq!(created, Transition::Counted { bytes: 300 });

        assert_eq!(
            ingestor.apply(&LifecycleEvent::died("a", "web")).await,
            Transition::Unchanged
        );
        assert_eq!(
            ingestor.apply(&LifecycleEvent::started("a", "web")).await,
            Transition::Unchanged
        );
        assert_eq!(ledger.committed().await, 300);

        let destroyed = ingestor.apply(&LifecycleEvent::destroyed("a", "web")).await;
        assert_eq!(destroyed, Transition::Uncounted { bytes: 300 });
        assert_eq!(ledger.committed().await, 0);
    }

    #[tokio::test]
    async fn test_non_container_events_are_ignored() {
        let (ledger, inventory, ingestor) = setup();
        // A network sharing an id with a container must not touch its record.
        inventory.upsert("a", "web", ContainerState::Running, 300).await;
        let network = ObjectKind::Other("network".to_string());

        for event in [
            LifecycleEvent::created("a", "bridge").with_object(network.clone()),
            LifecycleEvent::destroyed("a", "bridge").with_object(network),
        ] {
            assert_eq!(ingestor.apply(&event).await, Transition::Unchanged);
        }
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.committed().await, 0);

        let volume = LifecycleEvent::created("a", "data")
            .with_object(ObjectKind::from_type("volume"));
        assert_eq!(ingestor.apply(&volume).await, Transition::Unchanged);
        assert!(ledger.record(&ContainerId::from("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_create_confirms_admission_reservation() {
        let (ledger, inventory, ingestor) = setup();
        inventory.upsert("a", "web", ContainerState::Running, 512).await;
        assert!(ledger.try_reserve(512, 10_000).await.is_reserved());

        let created = ingestor.apply(&LifecycleEvent::created("a", "web")).await;

        assert_eq!(created, Transition::Confirmed { bytes: 512 });
        assert_eq!(ledger.committed().await, 512);
    }

    #[tokio::test]
    async fn test_inspect_failure_on_create_is_not_fatal() {
        let (ledger, inventory, ingestor) = setup();
        let id = ContainerId::from("a");
        inventory.fail_inspect(&id, Some("timeout".into())).await;

        let created = ingestor.apply(&LifecycleEvent::created("a", "web")).await;

        assert_eq!(created, Transition::Tracked);
        let record = ledger.record(&id).await;
        assert_eq!(record.as_ref().map(|r| r.counted), Some(false));
        assert_eq!(record.map(|r| r.committed_memory), Some(0));
    }

    /// Given a managed container whose inspect failed at create
    /// When it starts with a 200 byte limit, dies, and starts again
    /// Then the aggregate tracks running state without double counting
    #[tokio::test]
    async fn managed_lifecycle_follows_running_state() {
        let (ledger, inventory, ingestor) = setup();
        let id = ContainerId::from("pod");
        let name = "k8s_app_web-0_default";

        inventory.fail_inspect(&id, Some("not yet".into())).await;
        ingestor.apply(&LifecycleEvent::created("pod", name)).await;
        assert_eq!(ledger.committed().await, 0);

        inventory.fail_inspect(&id, None).await;
        inventory.upsert("pod", name, ContainerState::Running, 200).await;

        let started = ingestor.apply(&LifecycleEvent::started("pod", name)).await;
        assert_eq!(started, Transition::Counted { bytes: 200 });
        assert_eq!(ledger.committed().await, 200);

        let died = ingestor.apply(&LifecycleEvent::died("pod", name)).await;
        assert_eq!(died, Transition::Uncounted { bytes: 200 });
        assert_eq!(ledger.committed().await, 0);

        ingestor.apply(&LifecycleEvent::started("pod", name)).await;
        ingestor.apply(&LifecycleEvent::started("pod", name)).await;
        assert_eq!(ledger.committed().await, 200);

        let record = ledger.record(&id).await;
        assert_eq!(record.map(|r| r.counted), Some(true));
    }

    #[tokio::test]
    async fn test_managed_destroy_does_not_change_aggregate_after_die() {
        let (ledger, inventory, ingestor) = setup();
        let name = "k8s_app";
        inventory.upsert("pod", name, ContainerState::Running, 100).await;

        ingestor.apply(&LifecycleEvent::created("pod", name)).await;
        ingestor.apply(&LifecycleEvent::died("pod", name)).await;
        let destroyed = ingestor.apply(&LifecycleEvent::destroyed("pod", name)).await;

        assert_eq!(destroyed, Transition::Forgotten);
        assert_eq!(ledger.committed().await, 0);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_of_unknown_managed_container_counts_it() {
        let (ledger, inventory, ingestor) = setup();
        inventory
            .upsert("pod", "k8s_app", ContainerState::Running, 64)
            .await;

        let event = LifecycleEvent::new("pod", EventKind::Start);
        let started = ingestor.apply(&event).await;

        assert_eq!(started, Transition::Counted { bytes: 64 });
        assert_eq!(
            ledger.record(&ContainerId::from("pod")).await.map(|r| r.managed),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_other_actions_are_ignored() {
        let (ledger, _, ingestor) = setup();
        let event = LifecycleEvent::new("a", EventKind::from_action("pause"));
        assert_eq!(ingestor.apply(&event).await, Transition::Unchanged);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_spawned_ingestor_applies_events_and_stops() {
        let (ledger, inventory, ingestor) = setup();
        inventory.upsert("a", "web", ContainerState::Running, 100).await;
        let bus = Arc::new(EventBus::new());

        let handle = Arc::new(ingestor).spawn(bus.clone());
        let mut status = handle.watch_status();
        let running = tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| *s == IngestorStatus::Running),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        assert!(running);

        let _ = bus.publish(LifecycleEvent::created("a", "web")).await;
        for _ in 0..50 {
            if ledger.committed().await == 100 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ledger.committed().await, 100);

        handle.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;
        assert_eq!(outcome.ok().and_then(Result::ok), Some(IngestorStatus::Stopped));
    }

    #[tokio::test]
    async fn test_stream_end_is_observable() {
        let (_, _, ingestor) = setup();
        let bus = Arc::new(EventBus::new());

        let handle = Arc::new(ingestor).spawn(bus.clone());
        let mut status = handle.watch_status();
        let _ = tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| *s == IngestorStatus::Running),
        )
        .await;

        assert!(bus.fail("malformed event payload").await.is_ok());

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;
        let final_status = outcome.ok().and_then(Result::ok);
        assert!(final_status.as_ref().is_some_and(IngestorStatus::is_terminated));
    }

    #[tokio::test]
    async fn test_subscribe_failure_terminates() {
        let (_, _, ingestor) = setup();
        let bus = EventBus::new();
        bus.close().await;

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(IngestorStatus::Idle);
        let outcome = ingestor.run(&bus, stop_rx, &status_tx).await;

        assert!(outcome.is_terminated());
        assert!(status_rx.borrow().is_terminated());
    }
}
