//! Configuration for the admission engine.

use std::time::Duration;

use memgate_core::{ManagedNaming, DEFAULT_MANAGED_PREFIX};
use memgate_reconciler::{LoopConfig, ReconcilerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted reconciliation interval, in seconds.
pub const MAX_RECONCILE_INTERVAL_SECS: u64 = 3600;

/// What to do with a creation request that asks for no memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroMemoryPolicy {
    /// Deny with "must request memory".
    #[default]
    Reject,
    /// Admit; the container adds nothing to the aggregate.
    Allow,
}

/// What to do with a creation request whose body cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRequestPolicy {
    /// Deny with the decode error as the reason.
    #[default]
    Deny,
    /// Admit without accounting.
    Allow,
}

/// Configuration for the [`AdmissionEngine`](crate::AdmissionEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between reconciliation cycles.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Name prefix of orchestrator-managed containers.
    #[serde(default = "default_managed_name_prefix")]
    pub managed_name_prefix: String,

    /// Zero-memory request handling.
    #[serde(default)]
    pub zero_memory_policy: ZeroMemoryPolicy,

    /// Undecodable request handling.
    #[serde(default)]
    pub malformed_request_policy: MalformedRequestPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            managed_name_prefix: default_managed_name_prefix(),
            zero_memory_policy: ZeroMemoryPolicy::default(),
            malformed_request_policy: MalformedRequestPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Set the reconciliation interval.
    #[must_use]
    pub const fn with_reconcile_interval_secs(mut self, secs: u64) -> Self {
        self.reconcile_interval_secs = secs;
        self
    }

    /// Set the managed container name prefix.
    #[must_use]
    pub fn with_managed_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.managed_name_prefix = prefix.into();
        self
    }

    /// Set the zero-memory policy.
    #[must_use]
    pub const fn with_zero_memory_policy(mut self, policy: ZeroMemoryPolicy) -> Self {
        self.zero_memory_policy = policy;
        self
    }

    /// Set the malformed request policy.
    #[must_use]
    pub const fn with_malformed_request_policy(mut self, policy: MalformedRequestPolicy) -> Self {
        self.malformed_request_policy = policy;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse or a
    /// value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| Error::invalid_config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RECONCILE_INTERVAL_SECS).contains(&self.reconcile_interval_secs) {
            return Err(Error::invalid_config(format!(
                "reconcile_interval_secs must be between 1 and {MAX_RECONCILE_INTERVAL_SECS}, got {}",
                self.reconcile_interval_secs
            )));
        }
        if self.managed_name_prefix.trim().is_empty() {
            return Err(Error::invalid_config("managed_name_prefix must not be empty"));
        }
        Ok(())
    }

    /// Interval between reconciliation cycles.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Managed container naming convention.
    #[must_use]
    pub fn naming(&self) -> ManagedNaming {
        ManagedNaming::new(self.managed_name_prefix.clone())
    }

    pub(crate) fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            naming: self.naming(),
            ..ReconcilerConfig::default()
        }
    }

    pub(crate) const fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: self.reconcile_interval(),
            run_immediately: true,
        }
    }
}

const fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_managed_name_prefix() -> String {
    DEFAULT_MANAGED_PREFIX.to_string()
}
