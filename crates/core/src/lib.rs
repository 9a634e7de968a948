//! Core types, the memory ledger, and inventory contracts for memgate.
//!
//! - **Types**: container identities, records, listing and inspect results
//! - **Ledger**: the lock-guarded record map and committed aggregate shared
//!   by the admission gate, the event ingestor, and the reconciler
//! - **Inventory**: traits for the host resource and container inventories,
//!   plus an in-memory implementation

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod inventory;
pub mod ledger;
pub mod types;

pub use error::{Error, Result};
pub use inventory::{ContainerInventory, InMemoryInventory, ResourceInventory};
pub use ledger::{Ledger, ReplaceOutcome, Reservation, ScanTicket, Transition};
pub use types::{
    ContainerDetails, ContainerId, ContainerRecord, ContainerState, ContainerSummary,
    InventorySnapshot, ManagedNaming, DEFAULT_MANAGED_PREFIX,
};
