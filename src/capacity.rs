//! Host memory capacity.

use std::sync::Arc;

use memgate_core::ResourceInventory;
use tracing::{error, info};

use crate::error::{Error, Result};

/// Establishes the admission ceiling from the resource inventory.
pub struct CapacitySource {
    resources: Arc<dyn ResourceInventory>,
}

impl CapacitySource {
    /// Create a capacity source over a resource inventory.
    pub fn new(resources: Arc<dyn ResourceInventory>) -> Self {
        Self { resources }
    }

    /// Query total host memory once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityUnavailable`] if the inventory fails or
    /// reports zero. The error is fatal.
    pub async fn query(&self) -> Result<u64> {
        match self.resources.total_memory().await {
            Ok(0) => {
                error!("Resource inventory reported zero total memory");
                Err(Error::capacity_unavailable("total memory reported as zero"))
            }
            Ok(total) => {
                info!(total_memory = total, "Host memory capacity established");
                Ok(total)
            }
            Err(e) => {
                error!(error = %e, "Failed to query host memory capacity");
                Err(Error::capacity_unavailable(e.to_string()))
            }
        }
    }
}
