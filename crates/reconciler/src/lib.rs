//! Periodic reconciliation of the memory ledger against the container inventory.
//!
//! Events keep the ledger current between scans; the reconciler is the
//! authoritative correction. Each cycle:
//! 1. Takes a scan ticket from the ledger
//! 2. Lists every container, stopped ones included
//! 3. Inspects each one for its configured memory limit
//! 4. Atomically replaces the ledger if no newer scan got there first
//!
//! A failed listing skips the cycle and leaves the ledger as it was.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use memgate_core::{InMemoryInventory, Ledger};
//! use memgate_reconciler::{LoopConfig, Reconciler, ReconcilerConfig, ReconciliationLoop};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ledger = Arc::new(Ledger::new());
//!     let inventory = Arc::new(InMemoryInventory::new(8 << 30));
//!     let reconciler = Arc::new(Reconciler::new(ledger, inventory, ReconcilerConfig::default()));
//!
//!     let handle = ReconciliationLoop::new(reconciler, LoopConfig::default()).spawn();
//!     handle.stop();
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod r#loop;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use r#loop::{LoopConfig, LoopHandle, LoopStats, LoopStopper, ReconciliationLoop};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use types::ReconcileReport;
