//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The event channel was closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// Subscribing to the lifecycle stream failed.
    #[error("subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    /// The lifecycle stream reported an error mid-stream.
    #[error("event stream failed: {reason}")]
    StreamFailed { reason: String },

    /// The ingestion task could not be joined.
    #[error("ingestion task failed: {reason}")]
    TaskFailed { reason: String },

    /// An inventory call failed.
    #[error(transparent)]
    Core(#[from] memgate_core::Error),
}

impl Error {
    /// Create a subscription failed error.
    pub fn subscription_failed(reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            reason: reason.into(),
        }
    }

    /// Create a stream failed error.
    pub fn stream_failed(reason: impl Into<String>) -> Self {
        Self::StreamFailed {
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
