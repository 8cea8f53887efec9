//! Domain types for the Stratum state store.
//!
//! These types represent the persisted cluster state the placement engine
//! reads and writes: registered instances, replica-group mappings, and
//! committed segment placements. All types are serializable to/from JSON
//! for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unique identifier for a server instance.
pub type InstanceId = String;

/// Name of a table.
pub type TableName = String;

// ── Instances ──────────────────────────────────────────────────────

/// A server instance registered with the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
    /// Tenant/role tags, e.g. `DefaultTenant_OFFLINE`.
    pub tags: BTreeSet<String>,
    /// Disabled instances stay registered but receive no new segments.
    pub enabled: bool,
}

impl InstanceInfo {
    pub fn new(id: &str, host: &str, port: u16) -> Self {
        Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
            tags: BTreeSet::new(),
            enabled: true,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// ── Replica groups ─────────────────────────────────────────────────

/// Partition → replica group → ordered instances, for one table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaGroupMapping {
    pub table: TableName,
    /// Version assigned by the store on every successful save; 0 until the
    /// mapping has been persisted once.
    pub version: u64,
    /// Number of replica groups per partition (G).
    pub num_replica_groups: u32,
    /// Instances per partition in each group (K).
    pub instances_per_partition: u32,
    /// Offset into the instance pool where the next partition's slice starts.
    pub next_offset: u64,
    pub partitions: BTreeMap<u32, Vec<Vec<InstanceId>>>,
}

impl ReplicaGroupMapping {
    pub fn new(table: &str, num_replica_groups: u32, instances_per_partition: u32) -> Self {
        Self {
            table: table.to_string(),
            version: 0,
            num_replica_groups,
            instances_per_partition,
            next_offset: 0,
            partitions: BTreeMap::new(),
        }
    }

    /// The replica groups of `partition`, in group order.
    pub fn groups(&self, partition: u32) -> Option<&[Vec<InstanceId>]> {
        self.partitions.get(&partition).map(Vec::as_slice)
    }

    /// Instances of `group` in `partition`, in index order.
    pub fn instances(&self, partition: u32, group: usize) -> Option<&[InstanceId]> {
        self.groups(partition)
            .and_then(|groups| groups.get(group))
            .map(Vec::as_slice)
    }

    pub fn contains_partition(&self, partition: u32) -> bool {
        self.partitions.contains_key(&partition)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Every instance serving `partition`, across all of its groups.
    pub fn partition_instances(&self, partition: u32) -> BTreeSet<&str> {
        self.groups(partition)
            .into_iter()
            .flatten()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// `(group, index)` of `instance` within `partition`, if it belongs there.
    pub fn position(&self, partition: u32, instance: &str) -> Option<(usize, usize)> {
        self.groups(partition)?
            .iter()
            .enumerate()
            .find_map(|(group, members)| {
                members
                    .iter()
                    .position(|m| m == instance)
                    .map(|index| (group, index))
            })
    }
}

// ── External view ──────────────────────────────────────────────────

/// A committed placement of one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentPlacement {
    pub table: TableName,
    pub segment: String,
    pub partition: u32,
    /// Hosting instances. Replica-group placements list them in group order.
    pub instances: Vec<InstanceId>,
    /// Unix timestamp (seconds) when the placement was published.
    pub published_at: u64,
}

impl SegmentPlacement {
    /// Build the composite key for the external view table.
    pub fn table_key(&self) -> String {
        placement_key(&self.table, &self.segment)
    }
}

pub(crate) fn placement_key(table: &str, segment: &str) -> String {
    format!("{table}:{segment}")
}
