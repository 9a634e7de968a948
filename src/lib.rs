#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

//! # memgate
//!
//! Host-wide memory admission quota for container creation.
//!
//! Every creation request declares a memory limit; the engine admits it only
//! while the sum of committed limits stays strictly below total host memory.
//! The sum is kept current from lifecycle events and corrected by a periodic
//! full inventory scan.
//!
//! This crate is the facade over the workspace:
//! - `memgate-core`: the ledger and inventory contracts
//! - `memgate-events`: lifecycle events and the ingestor
//! - `memgate-reconciler`: the inventory scan and its loop
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use memgate::{AdmissionEngine, EngineConfig};
//! use memgate_core::InMemoryInventory;
//! use memgate_events::EventBus;
//!
//! #[tokio::main]
//! async fn main() -> memgate::Result<()> {
//!     let inventory = Arc::new(InMemoryInventory::new(16 << 30));
//!     let engine = AdmissionEngine::new(
//!         EngineConfig::default(),
//!         inventory.clone(),
//!         inventory,
//!         Arc::new(EventBus::new()),
//!     )?;
//!
//!     let verdict = engine.evaluate(512 << 20).await?;
//!     assert!(verdict.is_allowed());
//!     engine.shutdown().await
//! }
//! ```

pub mod capacity;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod request;

pub use capacity::CapacitySource;
pub use config::{EngineConfig, MalformedRequestPolicy, ZeroMemoryPolicy};
pub use engine::AdmissionEngine;
pub use error::{Error, Result};
pub use gate::{AdmissionGate, Verdict, REASON_MUST_REQUEST_MEMORY, REASON_NOT_ENOUGH_MEMORY};
pub use request::{AdmissionRequest, CreateContainerBody, HostConfig, RequestRoute};

// Re-export workspace crates
pub use memgate_core;
pub use memgate_events;
pub use memgate_reconciler;
