//! Replica-group assignment.
//!
//! Instances are grouped once per table into a persisted mapping:
//! partition → G replica groups → K ordered instances, with G equal to the
//! replication factor. Each segment then goes to exactly one instance of
//! every group of its partition, so any single group holds a full copy of
//! the partition.
//!
//! # Mapping construction
//!
//! The pool is sliced in order. Partition 0 takes the first G·K instances,
//! split into G contiguous blocks of K; each following partition takes the
//! next G·K, wrapping around the pool once it runs out. A table without a
//! partition column is a single partition 0.
//!
//! Wrapping means a pool smaller than P·G·K serves several partitions from
//! the same instances. That is allowed but logged, since it concentrates
//! load on the reused instances.
//!
//! # Mirroring
//!
//! With `mirror_across_groups`, the index chosen from group 0's counters is
//! reused for every other group of the partition, so index-aligned instances
//! across groups hold identical segment sets. Without it each group picks
//! its own least-loaded member.

use std::collections::{BTreeMap, HashMap};

use stratum_core::{ReplicaGroupConfig, TableConfig};
use stratum_state::{InstanceId, MappingWrite, ReplicaGroupMapping, SegmentPlacement};
use tracing::{debug, info, warn};

use crate::cluster::MappingStore;
use crate::error::{PlacementError, PlacementResult};
use crate::load::LoadTracker;
use crate::pool::InstancePool;
use crate::strategy::{Reservation, Selection};

/// Save attempts before giving up on a mapping other writers keep changing.
const MAX_SAVE_ATTEMPTS: u32 = 8;

#[derive(Debug)]
pub struct ReplicaGroupStrategy {
    table: String,
    num_groups: u32,
    instances_per_partition: u32,
    num_partitions: u32,
    mirror: bool,
    mapping: Option<ReplicaGroupMapping>,
    /// Counters scoped to `(partition, group)`.
    loads: HashMap<(u32, usize), LoadTracker>,
}

impl ReplicaGroupStrategy {
    pub fn new(config: &TableConfig, group: &ReplicaGroupConfig) -> Self {
        Self {
            table: config.name.clone(),
            num_groups: config.replication,
            instances_per_partition: group.instances_per_partition,
            num_partitions: config.num_partitions(),
            mirror: group.mirror_across_groups,
            mapping: None,
            loads: HashMap::new(),
        }
    }

    /// Instances one partition needs: G·K.
    pub fn instances_per_replica_set(&self) -> usize {
        self.num_groups as usize * self.instances_per_partition as usize
    }

    pub fn mapping(&self) -> Option<&ReplicaGroupMapping> {
        self.mapping.as_ref()
    }

    /// Use an already persisted mapping, e.g. when a table is registered
    /// against existing state.
    pub fn adopt(&mut self, mapping: ReplicaGroupMapping) -> PlacementResult<()> {
        self.check_compatible(&mapping)?;
        debug!(table = %self.table, version = mapping.version, "adopted replica-group mapping");
        self.mapping = Some(mapping);
        Ok(())
    }

    pub fn select(
        &mut self,
        partition: u32,
        pool: &InstancePool,
        store: &dyn MappingStore,
    ) -> PlacementResult<Selection> {
        pool.require(self.instances_per_replica_set())?;
        self.ensure_mapping(partition, pool, store)?;

        let groups = self
            .mapping
            .as_ref()
            .and_then(|m| m.groups(partition))
            .map(<[_]>::to_vec)
            .ok_or_else(|| self.incompatible(format!("no replica groups for partition {partition}")))?;

        let mut picks = Vec::with_capacity(groups.len());
        if self.mirror {
            let index = self.lightest_index(partition, 0, &groups[0])?;
            for (group, members) in groups.iter().enumerate() {
                picks.push((group, members[index].clone()));
            }
        } else {
            for (group, members) in groups.iter().enumerate() {
                let index = self.lightest_index(partition, group, members)?;
                picks.push((group, members[index].clone()));
            }
        }

        for (group, id) in &picks {
            self.tracker(partition, *group).increment(id);
        }

        let instances: Vec<InstanceId> = picks.iter().map(|(_, id)| id.clone()).collect();
        debug!(table = %self.table, partition, ?instances, mirror = self.mirror, "replica-group selection");
        Ok(Selection {
            instances,
            reservation: Reservation::Groups { partition, picks },
        })
    }

    pub fn release(&mut self, partition: u32, picks: &[(usize, InstanceId)]) {
        for (group, id) in picks {
            self.tracker(partition, *group).decrement(id);
        }
    }

    /// Count committed placements against the groups they landed in.
    ///
    /// Needs the mapping; without one there is nothing to attribute.
    pub fn seed(&mut self, view: &[SegmentPlacement]) {
        let Some(mapping) = self.mapping.take() else {
            return;
        };
        for placement in view {
            for id in &placement.instances {
                if let Some((group, _)) = mapping.position(placement.partition, id) {
                    self.tracker(placement.partition, group).increment(id);
                }
            }
        }
        self.mapping = Some(mapping);
    }

    /// Per-instance totals across every partition and group.
    pub fn loads(&self) -> BTreeMap<InstanceId, u32> {
        let mut totals = BTreeMap::new();
        for tracker in self.loads.values() {
            for (id, load) in tracker.snapshot() {
                *totals.entry(id).or_insert(0) += load;
            }
        }
        totals
    }

    /// Make sure the cached mapping covers `partition`, loading or building
    /// and persisting it as needed.
    ///
    /// A concurrent writer wins on conflict: its mapping is reloaded and
    /// reused, never overwritten.
    fn ensure_mapping(
        &mut self,
        partition: u32,
        pool: &InstancePool,
        store: &dyn MappingStore,
    ) -> PlacementResult<()> {
        if self.mapping.as_ref().is_some_and(|m| m.contains_partition(partition)) {
            return Ok(());
        }

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let stored = store.load_mapping(&self.table)?;
            if let Some(stored) = &stored {
                self.check_compatible(stored)?;
                if stored.contains_partition(partition) {
                    debug!(table = %self.table, version = stored.version, "reusing stored replica-group mapping");
                    self.mapping = Some(stored.clone());
                    return Ok(());
                }
            }

            let expected_version = stored.as_ref().map(|m| m.version);
            let mut mapping = stored.unwrap_or_else(|| {
                ReplicaGroupMapping::new(&self.table, self.num_groups, self.instances_per_partition)
            });
            self.extend(&mut mapping, pool);

            match store.save_mapping(&mapping, expected_version)? {
                MappingWrite::Committed { version } => {
                    mapping.version = version;
                    info!(
                        table = %self.table,
                        version,
                        partitions = mapping.num_partitions(),
                        groups = self.num_groups,
                        instances_per_partition = self.instances_per_partition,
                        "replica-group mapping persisted"
                    );
                    self.mapping = Some(mapping);
                    return Ok(());
                }
                MappingWrite::Conflict { current_version } => {
                    warn!(
                        table = %self.table,
                        attempt,
                        ?expected_version,
                        ?current_version,
                        "replica-group mapping changed concurrently, reloading"
                    );
                }
            }
        }

        Err(PlacementError::MappingContention {
            table: self.table.clone(),
            attempts: MAX_SAVE_ATTEMPTS,
        })
    }

    /// Add every partition the mapping is missing, slicing the pool from
    /// the mapping's current offset.
    fn extend(&self, mapping: &mut ReplicaGroupMapping, pool: &InstancePool) {
        let size = pool.len() as u64;
        let slice_len = self.instances_per_replica_set() as u64;
        let k = self.instances_per_partition as usize;

        for partition in 0..self.num_partitions {
            if mapping.contains_partition(partition) {
                continue;
            }
            let offset = mapping.next_offset;
            if offset + slice_len > size {
                warn!(
                    table = %self.table,
                    partition,
                    pool_size = size,
                    offset,
                    "instance pool exhausted, partition reuses instances of earlier partitions"
                );
            }

            let slice: Vec<InstanceId> = (0..slice_len)
                .map(|j| pool.instances()[((offset + j) % size) as usize].clone())
                .collect();
            let groups: Vec<Vec<InstanceId>> = slice.chunks(k).map(<[_]>::to_vec).collect();
            debug!(table = %self.table, partition, ?groups, "replica groups formed");

            mapping.partitions.insert(partition, groups);
            mapping.next_offset = offset + slice_len;
        }
    }

    fn check_compatible(&self, mapping: &ReplicaGroupMapping) -> PlacementResult<()> {
        if mapping.num_replica_groups != self.num_groups {
            return Err(self.incompatible(format!(
                "{} replica groups stored, {} configured",
                mapping.num_replica_groups, self.num_groups
            )));
        }
        if mapping.instances_per_partition != self.instances_per_partition {
            return Err(self.incompatible(format!(
                "{} instances per partition stored, {} configured",
                mapping.instances_per_partition, self.instances_per_partition
            )));
        }
        for (partition, groups) in &mapping.partitions {
            let well_formed = groups.len() == self.num_groups as usize
                && groups
                    .iter()
                    .all(|g| g.len() == self.instances_per_partition as usize);
            if !well_formed {
                return Err(self.incompatible(format!("partition {partition} has malformed groups")));
            }
        }
        Ok(())
    }

    fn lightest_index(
        &mut self,
        partition: u32,
        group: usize,
        members: &[InstanceId],
    ) -> PlacementResult<usize> {
        self.tracker(partition, group)
            .lightest(members, 1)
            .first()
            .copied()
            .ok_or_else(|| self.incompatible(format!("group {group} of partition {partition} is empty")))
    }

    fn tracker(&mut self, partition: u32, group: usize) -> &mut LoadTracker {
        self.loads.entry((partition, group)).or_default()
    }

    fn incompatible(&self, reason: String) -> PlacementError {
        PlacementError::IncompatibleMapping {
            table: self.table.clone(),
            reason,
        }
    }
}
