//! Admission gate.
//!
//! Decides each container creation against the host capacity and reserves
//! the requested memory atomically on acceptance.

use std::sync::Arc;

use memgate_core::{Ledger, Reservation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, MalformedRequestPolicy, ZeroMemoryPolicy};
use crate::request::{AdmissionRequest, RequestRoute};

/// Reason given when a creation request declares no memory limit.
pub const REASON_MUST_REQUEST_MEMORY: &str = "must request memory";

/// Reason given when the request does not fit under the capacity.
pub const REASON_NOT_ENOUGH_MEMORY: &str = "not enough memory";

/// Admission decision returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the call may proceed.
    #[serde(rename = "Allow")]
    pub allow: bool,
    /// Why it was denied.
    #[serde(rename = "Msg", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    /// An allowing verdict.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    /// A denying verdict with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
        }
    }

    /// Check if the verdict allows the call.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.allow
    }
}

/// Capacity check in front of container creation.
pub struct AdmissionGate {
    ledger: Arc<Ledger>,
    zero_memory_policy: ZeroMemoryPolicy,
    malformed_request_policy: MalformedRequestPolicy,
}

impl AdmissionGate {
    /// Create a gate over the shared ledger.
    pub fn new(ledger: Arc<Ledger>, config: &EngineConfig) -> Self {
        Self {
            ledger,
            zero_memory_policy: config.zero_memory_policy,
            malformed_request_policy: config.malformed_request_policy,
        }
    }

    /// Decide a creation request for `requested` bytes.
    ///
    /// On acceptance the bytes are reserved in the same critical section as
    /// the comparison, so concurrent calls never overshoot `capacity`.
    pub async fn evaluate(&self, requested: u64, capacity: u64) -> Verdict {
        if requested == 0 && self.zero_memory_policy == ZeroMemoryPolicy::Reject {
            info!("Denied container without a memory limit");
            return Verdict::deny(REASON_MUST_REQUEST_MEMORY);
        }

        match self.ledger.try_reserve(requested, capacity).await {
            Reservation::Reserved { committed } => {
                debug!(requested, committed, capacity, "Admitted container");
                Verdict::allow()
            }
            Reservation::Insufficient { committed } => {
                info!(requested, committed, capacity, "Denied container: not enough memory");
                Verdict::deny(REASON_NOT_ENOUGH_MEMORY)
            }
        }
    }

    /// Decide an intercepted runtime call.
    ///
    /// Only container creation is checked; everything else passes.
    pub async fn authorize_request(&self, request: &AdmissionRequest, capacity: u64) -> Verdict {
        if request.route() != RequestRoute::ContainerCreate {
            return Verdict::allow();
        }

        match request.create_body().and_then(|body| body.requested_memory()) {
            Ok(requested) => self.evaluate(requested, capacity).await,
            Err(e) => match self.malformed_request_policy {
                MalformedRequestPolicy::Deny => {
                    warn!(uri = %request.uri, error = %e, "Denied undecodable create request");
                    Verdict::deny(e.to_string())
                }
                MalformedRequestPolicy::Allow => {
                    warn!(uri = %request.uri, error = %e, "Admitted undecodable create request without accounting");
                    Verdict::allow()
                }
            },
        }
    }

    /// Decide a completed call on its way back. Always allows.
    #[must_use]
    pub const fn authorize_response(&self, _request: &AdmissionRequest) -> Verdict {
        Verdict::allow()
    }
}
