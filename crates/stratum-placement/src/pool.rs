//! Eligible instance pool for a table.
//!
//! The pool is a snapshot of the registry filtered by the table's server
//! tag, restricted to enabled instances and sorted by instance id. Both the
//! balanced and replica-group strategies break ties by position in this
//! sequence, so its order must not depend on registry iteration order.

use stratum_core::TableConfig;
use stratum_state::InstanceId;
use tracing::debug;

use crate::cluster::InstanceRegistry;
use crate::error::{PlacementError, PlacementResult};

/// Ordered, deduplicated instances eligible to host a table's segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePool {
    table: String,
    instances: Vec<InstanceId>,
}

impl InstancePool {
    /// Resolve the pool for `config` from the registry.
    pub fn resolve(registry: &dyn InstanceRegistry, config: &TableConfig) -> PlacementResult<Self> {
        let tag = config.server_tag();
        let instances = registry
            .list_instances(&tag)?
            .into_iter()
            .filter(|i| i.enabled && i.has_tag(&tag))
            .map(|i| i.id);
        let pool = Self::from_ids(&config.name, instances);
        debug!(table = %config.name, %tag, size = pool.len(), "instance pool resolved");
        Ok(pool)
    }

    pub fn from_ids(table: &str, ids: impl IntoIterator<Item = InstanceId>) -> Self {
        let mut instances: Vec<InstanceId> = ids.into_iter().collect();
        instances.sort();
        instances.dedup();
        Self {
            table: table.to_string(),
            instances,
        }
    }

    /// Fail unless the pool holds at least `required` instances.
    pub fn require(&self, required: usize) -> PlacementResult<()> {
        if self.instances.len() < required {
            return Err(PlacementError::InsufficientInstances {
                table: self.table.clone(),
                required,
                available: self.instances.len(),
            });
        }
        Ok(())
    }

    pub fn instances(&self) -> &[InstanceId] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
