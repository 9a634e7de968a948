//! Container lifecycle events and incremental memory accounting.
//!
//! - **Event types**: create/start/die/destroy lifecycle events
//! - **Event sources**: the subscription contract, plus an in-memory bus
//! - **Ingestor**: applies events to the shared ledger on a background task
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use memgate_core::{InMemoryInventory, Ledger, ManagedNaming};
//! use memgate_events::{EventBus, EventIngestor, LifecycleEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ledger = Arc::new(Ledger::new());
//!     let inventory = Arc::new(InMemoryInventory::new(8 << 30));
//!     let bus = Arc::new(EventBus::new());
//!
//!     let ingestor = Arc::new(EventIngestor::new(ledger, inventory, ManagedNaming::default()));
//!     let handle = ingestor.spawn(bus.clone());
//!
//!     bus.publish(LifecycleEvent::created("abc123", "web")).await.ok();
//!     handle.stop();
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod ingestor;

// Re-export main types
pub use bus::{EventBus, EventSource, EventStream, EventSubscription};
pub use error::{Error, Result};
pub use event::{EventKind, LifecycleEvent, ObjectKind, NAME_ATTRIBUTE};
pub use ingestor::{EventIngestor, IngestorHandle, IngestorStatus};
