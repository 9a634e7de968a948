//! Core error types for memgate operations.
//!
//! All errors are explicit and typed. Inventory failures carry the operation
//! that failed so callers can decide whether a failure is worth retrying.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for memgate operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Collaborator errors
    #[error("resource inventory unavailable: {reason}")]
    ResourceInventoryUnavailable { reason: String },

    #[error("container listing failed: {reason}")]
    ListingFailed { reason: String },

    #[error("inspect of container '{container_id}' failed: {reason}")]
    InspectFailed {
        container_id: String,
        reason: String,
    },

    #[error("container '{container_id}' not found")]
    ContainerNotFound { container_id: String },

    // Ledger errors
    #[error("stale scan ticket {ticket}: ledger is at scan epoch {current}")]
    StaleScan { ticket: u64, current: u64 },
}

impl Error {
    /// Create a resource inventory unavailable error.
    pub fn resource_unavailable(reason: impl Into<String>) -> Self {
        Self::ResourceInventoryUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a listing failed error.
    pub fn listing_failed(reason: impl Into<String>) -> Self {
        Self::ListingFailed {
            reason: reason.into(),
        }
    }

    /// Create an inspect failed error.
    pub fn inspect_failed(container_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InspectFailed {
            container_id: container_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a container not found error.
    pub fn container_not_found(container_id: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            container_id: container_id.into(),
        }
    }
}
