//! Core types shared by the ledger, the ingestor, and the reconciler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default name prefix of containers owned by the orchestrator.
pub const DEFAULT_MANAGED_PREFIX: &str = "k8s_";

/// Opaque container identity as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a container ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines (first 12 characters, like the runtime CLI).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContainerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Accounting record for a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container identity.
    pub id: ContainerId,
    /// Configured memory limit in bytes.
    pub committed_memory: u64,
    /// Whether `committed_memory` is part of the aggregate.
    pub counted: bool,
    /// Whether the orchestrator owns this container's lifecycle.
    pub managed: bool,
    /// Set when the container was observed with a zero memory limit.
    pub flagged: bool,
}

impl ContainerRecord {
    /// Create a counted record.
    pub fn counted(id: ContainerId, committed_memory: u64, managed: bool) -> Self {
        Self {
            id,
            committed_memory,
            counted: true,
            managed,
            flagged: committed_memory == 0,
        }
    }

    /// Create an uncounted record.
    pub fn uncounted(id: ContainerId, committed_memory: u64, managed: bool) -> Self {
        Self {
            id,
            committed_memory,
            counted: false,
            managed,
            flagged: false,
        }
    }

    /// Bytes this record contributes to the aggregate.
    #[must_use]
    pub const fn contribution(&self) -> u64 {
        if self.counted { self.committed_memory } else { 0 }
    }

    /// Whether the memory limit is still unknown and worth inspecting again.
    #[must_use]
    pub const fn needs_inspection(&self) -> bool {
        !self.counted && self.committed_memory == 0 && !self.flagged
    }
}

/// Runtime state of a container, as reported by the listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// The container is running.
    Running,
    /// Any other state (created, exited, paused, ...).
    Other(String),
}

impl ContainerState {
    /// Parse the runtime's state string.
    pub fn from_runtime(state: &str) -> Self {
        if state.eq_ignore_ascii_case("running") {
            Self::Running
        } else {
            Self::Other(state.to_ascii_lowercase())
        }
    }

    /// Check if the container is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    pub state: ContainerState,
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    /// Configured memory limit in bytes; zero means unlimited.
    pub memory_limit: u64,
}

/// Naming convention that identifies orchestrator-owned containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedNaming {
    prefix: String,
}

impl ManagedNaming {
    /// Create a naming convention with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Check whether a container name belongs to the orchestrator.
    ///
    /// Runtimes report names with a leading `/`; it is ignored.
    #[must_use]
    pub fn is_managed(&self, name: &str) -> bool {
        name.trim_start_matches('/').starts_with(&self.prefix)
    }
}

impl Default for ManagedNaming {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGED_PREFIX)
    }
}

/// Authoritative view of the host produced by one inventory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    /// Records for every container that was listed and inspected.
    pub records: Vec<ContainerRecord>,
    /// Containers that were listed but could not be inspected.
    pub unresolved: Vec<ContainerId>,
}

impl InventorySnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flagged (zero-limit) records.
    #[must_use]
    pub fn flagged_count(&self) -> usize {
        self.records.iter().filter(|r| r.flagged).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_naming_trims_slash() {
        let naming = ManagedNaming::default();
        assert!(naming.is_managed("/k8s_POD_web-0_default"));
        assert!(naming.is_managed("k8s_app_web-0_default"));
        assert!(!naming.is_managed("/nginx"));
        assert!(!naming.is_managed("my_k8s_thing"));
    }

    #[test]
    fn test_container_state_parsing() {
        assert!(ContainerState::from_runtime("running").is_running());
        assert!(ContainerState::from_runtime("Running").is_running());
        assert_eq!(
            ContainerState::from_runtime("Exited"),
            ContainerState::Other("exited".to_string())
        );
    }

    #[test]
    fn test_record_contribution() {
        let counted = ContainerRecord::counted(ContainerId::from("a"), 100, false);
        let uncounted = ContainerRecord::uncounted(ContainerId::from("b"), 100, true);
        assert_eq!(counted.contribution(), 100);
        assert_eq!(uncounted.contribution(), 0);
    }

    #[test]
    fn test_zero_limit_record_is_flagged() {
        let record = ContainerRecord::counted(ContainerId::from("a"), 0, false);
        assert!(record.flagged);
        assert!(!record.needs_inspection());
    }

    #[test]
    fn test_short_id() {
        let id = ContainerId::from("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::from("abc").short(), "abc");
    }

    #[test]
    fn test_snapshot_flagged_count() {
        let snapshot = InventorySnapshot {
            records: vec![
                ContainerRecord::counted(ContainerId::from("a"), 300, false),
                ContainerRecord::uncounted(ContainerId::from("b"), 500, true),
                ContainerRecord::counted(ContainerId::from("c"), 0, false),
            ],
            unresolved: Vec::new(),
        };
        assert_eq!(snapshot.flagged_count(), 1);
    }
}
