//! Error types for the reconciler crate.

use std::fmt;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The container listing failed; the cycle was skipped.
    ListingFailed { reason: String },
    /// A newer scan was applied first; this one was discarded.
    Superseded { epoch: u64, current: u64 },
    /// An inventory or ledger call failed.
    Core(memgate_core::Error),
    /// Invalid configuration.
    InvalidConfig { reason: String },
    /// The background loop task panicked or was aborted.
    TaskFailed { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListingFailed { reason } => {
                write!(f, "container listing failed, cycle skipped: {reason}")
            }
            Self::Superseded { epoch, current } => {
                write!(f, "scan {epoch} superseded by scan {current}")
            }
            Self::Core(err) => write!(f, "{err}"),
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::TaskFailed { reason } => {
                write!(f, "reconciliation task failed: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<memgate_core::Error> for Error {
    fn from(err: memgate_core::Error) -> Self {
        match err {
            memgate_core::Error::ListingFailed { reason } => Self::ListingFailed { reason },
            memgate_core::Error::StaleScan { ticket, current } => Self::Superseded {
                epoch: ticket,
                current,
            },
            other => Self::Core(other),
        }
    }
}

impl Error {
    /// Create a listing failed error.
    pub fn listing_failed(reason: impl Into<String>) -> Self {
        Self::ListingFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a task failed error.
    pub fn task_failed(reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            reason: reason.into(),
        }
    }
}
