//! The memory ledger: per-container records and the committed aggregate.
//!
//! Every mutation is one critical section over the record map, the aggregate,
//! and the pending reservations together. No I/O happens under the lock;
//! callers inspect containers first and hand the results in.
//!
//! At every quiescent point:
//!
//! ```text
//! committed == Σ(counted ? committed_memory : 0) + Σ(pending reservations)
//! ```

use std::collections::HashMap;

use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ContainerId, ContainerRecord, InventorySnapshot};

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The bytes were reserved; `committed` is the new aggregate.
    Reserved { committed: u64 },
    /// Not enough capacity; nothing changed.
    Insufficient { committed: u64 },
}

impl Reservation {
    /// Check if the reservation was accepted.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved { .. })
    }
}

/// How a lifecycle update changed the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Bytes were added to the aggregate.
    Counted { bytes: u64 },
    /// A pending reservation of the same size became a counted record.
    Confirmed { bytes: u64 },
    /// Bytes were subtracted from the aggregate.
    Uncounted { bytes: u64 },
    /// A record was inserted or updated without touching the aggregate.
    Tracked,
    /// A record was removed without touching the aggregate.
    Forgotten,
    /// Nothing changed.
    Unchanged,
}

/// Marks the start of an inventory scan.
///
/// Reservations made after the ticket was issued survive the replace that
/// uses it, since the scan cannot have seen their containers. So do records
/// that lifecycle events changed after the ticket: the event is newer than
/// anything the scan observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTicket {
    epoch: u64,
    reservation_watermark: u64,
}

impl ScanTicket {
    /// Scan epoch of this ticket.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Outcome of replacing the ledger with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Aggregate before the replace.
    pub previous_committed: u64,
    /// Aggregate after the replace.
    pub committed: u64,
    /// Records held after the replace.
    pub records: usize,
    /// Reservations dropped because the scan superseded them.
    pub dropped_reservations: usize,
    /// Reservations kept because they postdate the scan.
    pub retained_reservations: usize,
    /// Containers whose event-applied state overrode the scan.
    pub event_overrides: usize,
}

#[derive(Debug, Clone, Copy)]
struct PendingReservation {
    seq: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<ContainerId, ContainerRecord>,
    committed: u64,
    reservations: Vec<PendingReservation>,
    next_reservation: u64,
    issued_epoch: u64,
    applied_epoch: u64,
    /// Issued scan epoch at the time an event last changed each container.
    event_epochs: HashMap<ContainerId, u64>,
}

impl LedgerState {
    fn touch(&mut self, id: &ContainerId) {
        self.event_epochs.insert(id.clone(), self.issued_epoch);
    }

    fn add(&mut self, bytes: u64) {
        self.committed = self.committed.saturating_add(bytes);
    }

    fn subtract(&mut self, bytes: u64) {
        self.committed = self.committed.saturating_sub(bytes);
    }

    /// Count `bytes` for a freshly created container, consuming a matching
    /// reservation when one is pending.
    fn count_created(&mut self, bytes: u64) -> Transition {
        let matching = self.reservations.iter().position(|r| r.bytes == bytes);
        match matching {
            Some(index) if bytes > 0 => {
                self.reservations.remove(index);
                Transition::Confirmed { bytes }
            }
            _ => {
                self.add(bytes);
                Transition::Counted { bytes }
            }
        }
    }

    fn reserved_total(&self) -> u64 {
        self.reservations
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.bytes))
    }
}

/// Shared accounting state guarded by a single lock.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `requested` bytes if the aggregate stays strictly below `limit`.
    pub async fn try_reserve(&self, requested: u64, limit: u64) -> Reservation {
        let mut state = self.state.lock().await;
        match state.committed.checked_add(requested) {
            Some(total) if total < limit => {
                state.committed = total;
                if requested > 0 {
                    let seq = state.next_reservation;
                    state.next_reservation = seq.saturating_add(1);
                    state.reservations.push(PendingReservation {
                        seq,
                        bytes: requested,
                    });
                }
                Reservation::Reserved { committed: total }
            }
            _ => Reservation::Insufficient {
                committed: state.committed,
            },
        }
    }

    /// Apply a create event.
    ///
    /// `memory` is the inspected limit, or `None` if the inspect failed; in
    /// that case the record is kept uncounted until a later start or scan.
    pub async fn record_created(
        &self,
        id: &ContainerId,
        managed: bool,
        memory: Option<u64>,
    ) -> Transition {
        let mut state = self.state.lock().await;
        let existing = state.records.get(id).cloned();
        match (existing, memory) {
            (Some(record), _) if record.counted => Transition::Unchanged,
            (Some(record), Some(bytes)) if record.needs_inspection() => {
                let transition = state.count_created(bytes);
                state.records.insert(
                    id.clone(),
                    ContainerRecord::counted(id.clone(), bytes, record.managed),
                );
                state.touch(id);
                transition
            }
            (Some(_), _) => Transition::Unchanged,
            (None, Some(bytes)) => {
                let transition = state.count_created(bytes);
                state
                    .records
                    .insert(id.clone(), ContainerRecord::counted(id.clone(), bytes, managed));
                state.touch(id);
                transition
            }
            (None, None) => {
                state
                    .records
                    .insert(id.clone(), ContainerRecord::uncounted(id.clone(), 0, managed));
                state.touch(id);
                Transition::Tracked
            }
        }
    }

    /// Apply a start event.
    ///
    /// Only managed containers are counted on start, and only when they are
    /// not already counted. `memory` refreshes the recorded limit.
    pub async fn record_started(
        &self,
        id: &ContainerId,
        managed: bool,
        memory: Option<u64>,
    ) -> Transition {
        let mut state = self.state.lock().await;
        let existing = state.records.get(id).cloned();
        match existing {
            Some(record) if !record.managed || record.counted => Transition::Unchanged,
            Some(record) => {
                let bytes = memory.unwrap_or(record.committed_memory);
                if memory.is_none() && record.needs_inspection() {
                    return Transition::Unchanged;
                }
                state.add(bytes);
                state
                    .records
                    .insert(id.clone(), ContainerRecord::counted(id.clone(), bytes, true));
                state.touch(id);
                Transition::Counted { bytes }
            }
            None if !managed => Transition::Unchanged,
            None => match memory {
                Some(bytes) => {
                    state.add(bytes);
                    state
                        .records
                        .insert(id.clone(), ContainerRecord::counted(id.clone(), bytes, true));
                    state.touch(id);
                    Transition::Counted { bytes }
                }
                None => {
                    state
                        .records
                        .insert(id.clone(), ContainerRecord::uncounted(id.clone(), 0, true));
                    state.touch(id);
                    Transition::Tracked
                }
            },
        }
    }

    /// Apply a die event. Only counted managed containers change.
    pub async fn record_died(&self, id: &ContainerId) -> Transition {
        let mut state = self.state.lock().await;
        let bytes = match state.records.get_mut(id) {
            Some(record) if record.managed && record.counted => {
                record.counted = false;
                record.committed_memory
            }
            _ => return Transition::Unchanged,
        };
        state.subtract(bytes);
        state.touch(id);
        Transition::Uncounted { bytes }
    }

    /// Apply a destroy event: the record is removed, and its bytes leave the
    /// aggregate if it was still counted.
    pub async fn record_destroyed(&self, id: &ContainerId) -> Transition {
        let mut state = self.state.lock().await;
        let transition = match state.records.remove(id) {
            Some(record) if record.counted => {
                state.subtract(record.committed_memory);
                Transition::Uncounted {
                    bytes: record.committed_memory,
                }
            }
            Some(_) => Transition::Forgotten,
            None => Transition::Unchanged,
        };
        // A destroy is newer than any scan in flight even when nothing was
        // recorded; a listing taken before it must not bring the container back.
        state.touch(id);
        transition
    }

    /// Issue a ticket marking the start of an inventory scan.
    pub async fn begin_scan(&self) -> ScanTicket {
        let mut state = self.state.lock().await;
        state.issued_epoch = state.issued_epoch.saturating_add(1);
        ScanTicket {
            epoch: state.issued_epoch,
            reservation_watermark: state.next_reservation,
        }
    }

    /// Replace records and aggregate with the result of a scan.
    ///
    /// Containers the scan listed but could not inspect keep their previous
    /// record. Containers changed by an event after the ticket keep their
    /// current state, present or removed. Reservations made before the
    /// ticket are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleScan`] if a scan started after `ticket` was
    /// already applied; the ledger is left untouched.
    pub async fn replace(
        &self,
        ticket: ScanTicket,
        snapshot: InventorySnapshot,
    ) -> Result<ReplaceOutcome> {
        let mut state = self.state.lock().await;
        if ticket.epoch <= state.applied_epoch {
            return Err(Error::StaleScan {
                ticket: ticket.epoch,
                current: state.applied_epoch,
            });
        }

        let previous_committed = state.committed;
        let (retained, dropped): (Vec<PendingReservation>, Vec<PendingReservation>) =
            std::mem::take(&mut state.reservations)
                .into_iter()
                .partition(|r| r.seq >= ticket.reservation_watermark);

        let mut records: HashMap<ContainerId, ContainerRecord> = snapshot
            .records
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        for id in snapshot.unresolved {
            if let Some(previous) = state.records.get(&id) {
                records.entry(id).or_insert_with(|| previous.clone());
            }
        }

        state.event_epochs.retain(|_, epoch| *epoch >= ticket.epoch);
        let event_overrides = state.event_epochs.len();
        for id in state.event_epochs.keys() {
            match state.records.get(id) {
                Some(current) => {
                    records.insert(id.clone(), current.clone());
                }
                None => {
                    records.remove(id);
                }
            }
        }

        state.records = records;
        state.reservations = retained;
        state.applied_epoch = ticket.epoch;
        let counted = state
            .records
            .values()
            .fold(0u64, |acc, r| acc.saturating_add(r.contribution()));
        state.committed = counted.saturating_add(state.reserved_total());

        debug!(
            epoch = ticket.epoch,
            previous_committed,
            committed = state.committed,
            dropped_reservations = dropped.len(),
            event_overrides,
            "Ledger replaced from scan"
        );

        Ok(ReplaceOutcome {
            previous_committed,
            committed: state.committed,
            records: state.records.len(),
            dropped_reservations: dropped.len(),
            retained_reservations: state.reservations.len(),
            event_overrides,
        })
    }

    /// Current aggregate committed memory.
    pub async fn committed(&self) -> u64 {
        self.state.lock().await.committed
    }

    /// Get a copy of one record.
    pub async fn record(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    /// Copies of all records, ordered by container ID.
    pub async fn records(&self) -> Vec<ContainerRecord> {
        self.state
            .lock()
            .await
            .records
            .values()
            .cloned()
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .collect()
    }

    /// Check if a known record still lacks its committed size.
    ///
    /// Unknown ids report `true`: nothing is known about them yet.
    pub async fn needs_inspection(&self, id: &ContainerId) -> bool {
        self.state
            .lock()
            .await
            .records
            .get(id)
            .is_none_or(ContainerRecord::needs_inspection)
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Check if the ledger holds no records.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    /// Sizes of the pending reservations, oldest first.
    pub async fn pending_reservations(&self) -> Vec<u64> {
        self.state
            .lock()
            .await
            .reservations
            .iter()
            .map(|r| r.bytes)
            .collect()
    }

    /// Recompute the invariant from scratch; true when the aggregate matches.
    pub async fn is_consistent(&self) -> bool {
        let state = self.state.lock().await;
        let counted = state
            .records
            .values()
            .fold(0u64, |acc, r| acc.saturating_add(r.contribution()));
        counted.saturating_add(state.reserved_total()) == state.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ContainerId {
        ContainerId::from(s)
    }

    #[tokio::test]
    async fn test_reserve_boundary_is_strict() {
        let ledger = Ledger::new();
        assert!(ledger.try_reserve(999, 1_000).await.is_reserved());
        assert_eq!(
            ledger.try_reserve(1, 1_000).await,
            Reservation::Insufficient { committed: 999 }
        );
        assert_eq!(ledger.committed().await, 999);
    }

    #[tokio::test]
    async fn test_reserve_overflow_is_rejected() {
        let ledger = Ledger::new();
        assert!(ledger.try_reserve(u64::MAX - 1, u64::MAX).await.is_reserved());
        assert!(!ledger.try_reserve(10, u64::MAX).await.is_reserved());
    }

    #[tokio::test]
    async fn test_create_confirms_reservation() {
        let ledger = Ledger::new();
        assert!(ledger.try_reserve(256, 1_000).await.is_reserved());

        let transition = ledger.record_created(&id("a"), false, Some(256)).await;

        assert_eq!(transition, Transition::Confirmed { bytes: 256 });
        assert_eq!(ledger.committed().await, 256);
        assert!(ledger.pending_reservations().await.is_empty());
        assert!(ledger.is_consistent().await);
    }

    #[tokio::test]
    async fn test_create_without_reservation_counts() {
        let ledger = Ledger::new();
        let transition = ledger.record_created(&id("a"), false, Some(128)).await;
        assert_eq!(transition, Transition::Counted { bytes: 128 });
        assert_eq!(ledger.committed().await, 128);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_ignored() {
        let ledger = Ledger::new();
        ledger.record_created(&id("a"), false, Some(128)).await;
        let transition = ledger.record_created(&id("a"), false, Some(128)).await;
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(ledger.committed().await, 128);
    }

    #[tokio::test]
    async fn test_failed_inspect_tracks_uncounted() {
        let ledger = Ledger::new();
        let transition = ledger.record_created(&id("a"), false, None).await;
        assert_eq!(transition, Transition::Tracked);
        let record = ledger.record(&id("a")).await;
        assert_eq!(record.as_ref().map(|r| r.counted), Some(false));
        assert_eq!(record.map(|r| r.committed_memory), Some(0));
        assert_eq!(ledger.committed().await, 0);
    }

    #[tokio::test]
    async fn test_unmanaged_destroy_uncounts() {
        let ledger = Ledger::new();
        ledger.record_created(&id("a"), false, Some(300)).await;
        assert_eq!(ledger.record_died(&id("a")).await, Transition::Unchanged);
        assert_eq!(
            ledger.record_started(&id("a"), false, None).await,
            Transition::Unchanged
        );
        assert_eq!(
            ledger.record_destroyed(&id("a")).await,
            Transition::Uncounted { bytes: 300 }
        );
        assert_eq!(ledger.committed().await, 0);
        assert!(ledger.is_empty().await);
    }

    /// Given a managed container created while its inspect failed
    /// When it starts, dies, and starts again
    /// Then its bytes are counted exactly once at a time
    #[tokio::test]
    async fn managed_start_die_start_counts_once() {
        let ledger = Ledger::new();
        let pod = id("k8s-pod");

        assert_eq!(
            ledger.record_created(&pod, true, None).await,
            Transition::Tracked
        );
        assert_eq!(
            ledger.record_started(&pod, true, Some(200)).await,
            Transition::Counted { bytes: 200 }
        );
        assert_eq!(ledger.committed().await, 200);

        assert_eq!(
            ledger.record_started(&pod, true, Some(200)).await,
            Transition::Unchanged
        );
        assert_eq!(
            ledger.record_died(&pod).await,
            Transition::Uncounted { bytes: 200 }
        );
        assert_eq!(ledger.committed().await, 0);
        assert_eq!(ledger.record_died(&pod).await, Transition::Unchanged);

        assert_eq!(
            ledger.record_started(&pod, true, None).await,
            Transition::Counted { bytes: 200 }
        );
        assert_eq!(ledger.committed().await, 200);
        assert!(ledger.is_consistent().await);
    }

    #[tokio::test]
    async fn test_managed_destroy_after_die_keeps_aggregate() {
        let ledger = Ledger::new();
        let pod = id("pod");
        ledger.record_created(&pod, true, Some(100)).await;
        ledger.record_died(&pod).await;
        assert_eq!(ledger.record_destroyed(&pod).await, Transition::Forgotten);
        assert_eq!(ledger.committed().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_noops() {
        let ledger = Ledger::new();
        assert_eq!(ledger.record_died(&id("x")).await, Transition::Unchanged);
        assert_eq!(ledger.record_destroyed(&id("x")).await, Transition::Unchanged);
        assert_eq!(
            ledger.record_started(&id("x"), false, Some(10)).await,
            Transition::Unchanged
        );
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_replace_drops_superseded_reservations() {
        let ledger = Ledger::new();
        assert!(ledger.try_reserve(100, 1_000).await.is_reserved());
        let ticket = ledger.begin_scan().await;
        assert!(ledger.try_reserve(50, 1_000).await.is_reserved());

        let snapshot = InventorySnapshot {
            records: vec![ContainerRecord::counted(id("a"), 100, false)],
            unresolved: Vec::new(),
        };
        let outcome = ledger.replace(ticket, snapshot).await;

        assert_eq!(
            outcome,
            Ok(ReplaceOutcome {
                previous_committed: 150,
                committed: 150,
                records: 1,
                dropped_reservations: 1,
                retained_reservations: 1,
                event_overrides: 0,
            })
        );
        assert_eq!(ledger.pending_reservations().await, vec![50]);
    }

    #[tokio::test]
    async fn test_replace_keeps_unresolved_records() {
        let ledger = Ledger::new();
        ledger.record_created(&id("a"), false, Some(400)).await;
        ledger.record_created(&id("gone"), false, Some(100)).await;

        let ticket = ledger.begin_scan().await;
        let snapshot = InventorySnapshot {
            records: Vec::new(),
            unresolved: vec![id("a"), id("never-seen")],
        };
        let outcome = ledger.replace(ticket, snapshot).await;

        assert_eq!(outcome.map(|o| o.committed), Ok(400));
        assert!(ledger.record(&id("a")).await.is_some());
        assert!(ledger.record(&id("gone")).await.is_none());
        assert!(ledger.record(&id("never-seen")).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_scan_is_rejected() {
        let ledger = Ledger::new();
        let older = ledger.begin_scan().await;
        let newer = ledger.begin_scan().await;

        let snapshot = InventorySnapshot {
            records: vec![ContainerRecord::counted(id("a"), 10, false)],
            unresolved: Vec::new(),
        };
        assert!(ledger.replace(newer, snapshot.clone()).await.is_ok());
        assert!(matches!(
            ledger.replace(older, InventorySnapshot::new()).await,
            Err(Error::StaleScan { .. })
        ));
        assert_eq!(ledger.committed().await, 10);
    }

    #[tokio::test]
    async fn test_zero_memory_reservation_leaves_nothing_pending() {
        let ledger = Ledger::new();
        assert!(ledger.try_reserve(0, 10).await.is_reserved());
        assert!(ledger.pending_reservations().await.is_empty());
        assert_eq!(ledger.committed().await, 0);
    }

    #[tokio::test]
    async fn test_needs_inspection() {
        let ledger = Ledger::new();
        assert!(ledger.needs_inspection(&id("unknown")).await);

        ledger.record_created(&id("a"), true, None).await;
        assert!(ledger.needs_inspection(&id("a")).await);

        ledger.record_started(&id("a"), true, Some(64)).await;
        assert!(!ledger.needs_inspection(&id("a")).await);
    }

    /// Given a scan in flight
    /// When a container is admitted and its create event lands before the replace
    /// Then the replace keeps the container and the next admission sees its bytes
    #[tokio::test]
    async fn test_create_during_scan_survives_replace() {
        let ledger = Ledger::new();
        let ticket = ledger.begin_scan().await;
        assert!(ledger.try_reserve(500, 1_000).await.is_reserved());
        assert_eq!(
            ledger.record_created(&id("new"), false, Some(500)).await,
            Transition::Confirmed { bytes: 500 }
        );

        let outcome = ledger.replace(ticket, InventorySnapshot::new()).await;

        assert_eq!(outcome.map(|o| (o.committed, o.event_overrides)), Ok((500, 1)));
        assert_eq!(
            ledger.record(&id("new")).await.map(|r| r.contribution()),
            Some(500)
        );
        assert_eq!(
            ledger.try_reserve(900, 1_000).await,
            Reservation::Insufficient { committed: 500 }
        );
        assert!(ledger.is_consistent().await);
    }

    /// Given a scan that listed a container
    /// When the container is destroyed before the replace
    /// Then the replace does not bring it back
    #[tokio::test]
    async fn test_destroy_during_scan_is_not_resurrected() {
        let ledger = Ledger::new();
        ledger.record_created(&id("a"), false, Some(300)).await;
        let ticket = ledger.begin_scan().await;
        let snapshot = InventorySnapshot {
            records: vec![ContainerRecord::counted(id("a"), 300, false)],
            unresolved: Vec::new(),
        };
        ledger.record_destroyed(&id("a")).await;

        let outcome = ledger.replace(ticket, snapshot).await;

        assert_eq!(outcome.map(|o| o.committed), Ok(0));
        assert!(ledger.record(&id("a")).await.is_none());
    }

    /// Given events applied before a scan began
    /// When the scan is applied
    /// Then the snapshot wins over them
    #[tokio::test]
    async fn test_events_before_the_ticket_defer_to_the_scan() {
        let ledger = Ledger::new();
        ledger.record_created(&id("missed"), false, Some(300)).await;
        let ticket = ledger.begin_scan().await;

        let outcome = ledger.replace(ticket, InventorySnapshot::new()).await;

        assert_eq!(outcome.map(|o| (o.committed, o.event_overrides)), Ok((0, 0)));
        assert!(ledger.is_empty().await);
    }
}
