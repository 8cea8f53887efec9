//! Collaborator capabilities the placement engine depends on.
//!
//! The engine never talks to the coordination layer directly. It lists
//! instances through [`InstanceRegistry`], keeps versioned replica-group
//! mappings in a [`MappingStore`] and announces results through a
//! [`PlacementPublisher`]. [`StateStore`] implements all three; tests swap
//! in fakes.

use stratum_state::{
    InstanceInfo, MappingWrite, ReplicaGroupMapping, SegmentPlacement, StateResult, StateStore,
};

/// Lists the instances carrying a tag.
///
/// Implementations must return the same sequence for an unchanged registry.
pub trait InstanceRegistry: Send + Sync {
    fn list_instances(&self, tag: &str) -> StateResult<Vec<InstanceInfo>>;
}

/// Persists replica-group mappings with optimistic versioning.
pub trait MappingStore: Send + Sync {
    fn load_mapping(&self, table: &str) -> StateResult<Option<ReplicaGroupMapping>>;

    /// Save `mapping` if the stored version is still `expected_version`.
    fn save_mapping(
        &self,
        mapping: &ReplicaGroupMapping,
        expected_version: Option<u64>,
    ) -> StateResult<MappingWrite>;

    fn delete_mapping(&self, table: &str) -> StateResult<bool>;
}

/// Commits placements to the external view.
pub trait PlacementPublisher: Send + Sync {
    /// Commit point: a placement is complete once this returns `Ok`.
    fn publish(&self, placement: &SegmentPlacement) -> StateResult<()>;

    fn lookup(&self, table: &str, segment: &str) -> StateResult<Option<SegmentPlacement>>;

    fn external_view(&self, table: &str) -> StateResult<Vec<SegmentPlacement>>;

    /// Remove every placement of a table. Returns how many were removed.
    fn retract_table(&self, table: &str) -> StateResult<u32>;
}

impl InstanceRegistry for StateStore {
    fn list_instances(&self, tag: &str) -> StateResult<Vec<InstanceInfo>> {
        self.list_instances_with_tag(tag)
    }
}

impl MappingStore for StateStore {
    fn load_mapping(&self, table: &str) -> StateResult<Option<ReplicaGroupMapping>> {
        self.get_mapping(table)
    }

    fn save_mapping(
        &self,
        mapping: &ReplicaGroupMapping,
        expected_version: Option<u64>,
    ) -> StateResult<MappingWrite> {
        self.put_mapping(mapping, expected_version)
    }

    fn delete_mapping(&self, table: &str) -> StateResult<bool> {
        StateStore::delete_mapping(self, table)
    }
}

impl PlacementPublisher for StateStore {
    fn publish(&self, placement: &SegmentPlacement) -> StateResult<()> {
        self.put_placement(placement)
    }

    fn lookup(&self, table: &str, segment: &str) -> StateResult<Option<SegmentPlacement>> {
        self.get_placement(table, segment)
    }

    fn external_view(&self, table: &str) -> StateResult<Vec<SegmentPlacement>> {
        self.list_placements_for_table(table)
    }

    fn retract_table(&self, table: &str) -> StateResult<u32> {
        self.delete_placements_for_table(table)
    }
}
