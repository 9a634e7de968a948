//! Inventory contracts consumed by memgate, and an in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{ContainerDetails, ContainerId, ContainerState, ContainerSummary};

/// Host resource inventory.
#[async_trait]
pub trait ResourceInventory: Send + Sync {
    /// Total usable host memory in bytes.
    async fn total_memory(&self) -> Result<u64>;
}

/// Container inventory of the local runtime.
#[async_trait]
pub trait ContainerInventory: Send + Sync {
    /// List containers, optionally including stopped ones.
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>>;

    /// Inspect one container for its configured memory limit.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails>;
}

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    state: ContainerState,
    memory_limit: u64,
}

#[derive(Debug, Default)]
struct InventoryState {
    total_memory: Option<u64>,
    containers: BTreeMap<ContainerId, FakeContainer>,
    listing_error: Option<String>,
    inspect_errors: BTreeMap<ContainerId, String>,
}

/// In-memory inventory for testing and embedding.
///
/// Implements both inventory traits over a mutable container table. Failures
/// can be injected per call kind.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: RwLock<InventoryState>,
}

impl InMemoryInventory {
    /// Create an inventory reporting `total_memory` bytes of host memory.
    pub fn new(total_memory: u64) -> Self {
        Self {
            state: RwLock::new(InventoryState {
                total_memory: Some(total_memory),
                ..InventoryState::default()
            }),
        }
    }

    /// Create an inventory whose resource query always fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Add or replace a container.
    pub async fn upsert(
        &self,
        id: impl Into<ContainerId>,
        name: impl Into<String>,
        state: ContainerState,
        memory_limit: u64,
    ) {
        let mut inner = self.state.write().await;
        inner.containers.insert(
            id.into(),
            FakeContainer {
                name: name.into(),
                state,
                memory_limit,
            },
        );
    }

    /// Make every listing call fail with `reason` until cleared.
    pub async fn fail_listing(&self, reason: Option<String>) {
        self.state.write().await.listing_error = reason;
    }

    /// Make inspect calls for `id` fail with `reason` until cleared.
    pub async fn fail_inspect(&self, id: &ContainerId, reason: Option<String>) {
        let mut inner = self.state.write().await;
        match reason {
            Some(reason) => {
                inner.inspect_errors.insert(id.clone(), reason);
            }
            None => {
                inner.inspect_errors.remove(id);
            }
        }
    }
}

#[async_trait]
impl ResourceInventory for InMemoryInventory {
    async fn total_memory(&self) -> Result<u64> {
        self.state
            .read()
            .await
            .total_memory
            .ok_or_else(|| Error::resource_unavailable("no resource inventory configured"))
    }
}

#[async_trait]
impl ContainerInventory for InMemoryInventory {
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>> {
        let inner = self.state.read().await;
        if let Some(reason) = &inner.listing_error {
            return Err(Error::listing_failed(reason.clone()));
        }
        Ok(inner
            .containers
            .iter()
            .filter(|(_, c)| include_stopped || c.state.is_running())
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: format!("/{}", c.name),
                state: c.state.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let inner = self.state.read().await;
        if let Some(reason) = inner.inspect_errors.get(id) {
            return Err(Error::inspect_failed(id.as_str(), reason.clone()));
        }
        inner
            .containers
            .get(id)
            .map(|c| ContainerDetails {
                id: id.clone(),
                name: format!("/{}", c.name),
                memory_limit: c.memory_limit,
            })
            .ok_or_else(|| Error::container_not_found(id.as_str()))
    }
}
