//! Error types for the admission engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Admission engine error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Host memory capacity could not be established.
    #[error("host memory capacity unavailable: {reason}")]
    CapacityUnavailable { reason: String },

    /// A container-create request body could not be decoded.
    #[error("malformed request body: {reason}")]
    MalformedRequest { reason: String },

    /// Invalid engine configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The engine was shut down and no longer admits anything.
    #[error("admission engine is shut down")]
    ShutDown,

    /// A reconciliation cycle failed.
    #[error(transparent)]
    Reconcile(#[from] memgate_reconciler::Error),

    /// Event ingestion failed.
    #[error(transparent)]
    Events(#[from] memgate_events::Error),

    /// An inventory or ledger call failed.
    #[error(transparent)]
    Core(#[from] memgate_core::Error),
}

impl Error {
    /// Create a capacity unavailable error.
    pub fn capacity_unavailable(reason: impl Into<String>) -> Self {
        Self::CapacityUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a malformed request error.
    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Check if the host should exit rather than keep serving.
    ///
    /// Without a capacity figure no admission decision is meaningful.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::CapacityUnavailable { .. } | Self::InvalidConfig { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::malformed_request("expected value at line 1 column 1");
        assert_eq!(
            err.to_string(),
            "malformed request body: expected value at line 1 column 1"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::capacity_unavailable("sysinfo failed").is_fatal());
        assert!(Error::invalid_config("interval").is_fatal());
        assert!(!Error::malformed_request("bad").is_fatal());
        assert!(!Error::Reconcile(memgate_reconciler::Error::listing_failed("eof")).is_fatal());
    }

    #[test]
    fn test_crate_error_conversion() {
        let err: Error = memgate_core::Error::listing_failed("eof").into();
        assert!(matches!(err, Error::Core(_)));
        assert!(err.to_string().contains("eof"));
    }
}
