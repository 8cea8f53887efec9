//! Assignment strategy dispatch.
//!
//! The set of strategies is closed, and each carries different state, so a
//! table's strategy is an enum owning that state. The engine keeps one per
//! registered table behind the table's lock.

use std::collections::BTreeMap;

use stratum_core::{ConfigError, StrategyKind, TableConfig};
use stratum_state::{InstanceId, ReplicaGroupMapping, SegmentPlacement};

use crate::balanced::BalancedStrategy;
use crate::cluster::MappingStore;
use crate::error::PlacementResult;
use crate::pool::InstancePool;
use crate::random::RandomStrategy;
use crate::replica_group::ReplicaGroupStrategy;

/// Counter increments made by one selection, kept so they can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The strategy keeps no counters.
    Untracked,
    /// Table-wide counters of these instances were incremented.
    Instances(Vec<InstanceId>),
    /// `(group, instance)` counters of one partition were incremented.
    Groups {
        partition: u32,
        picks: Vec<(usize, InstanceId)>,
    },
}

/// Instances chosen for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub instances: Vec<InstanceId>,
    pub reservation: Reservation,
}

/// A table's assignment strategy together with its state.
#[derive(Debug)]
pub enum AssignmentStrategy {
    Random(RandomStrategy),
    Balanced(BalancedStrategy),
    ReplicaGroup(ReplicaGroupStrategy),
}

impl AssignmentStrategy {
    /// Build the strategy a validated table config asks for.
    pub fn for_table(config: &TableConfig, rng_seed: Option<u64>) -> PlacementResult<Self> {
        config.validate()?;
        let strategy = match config.strategy {
            StrategyKind::Random => Self::Random(RandomStrategy::new(rng_seed)),
            StrategyKind::Balanced => Self::Balanced(BalancedStrategy::new()),
            StrategyKind::ReplicaGroup => {
                let group = config.replica_group.as_ref().ok_or_else(|| {
                    ConfigError::MissingReplicaGroupConfig {
                        table: config.name.clone(),
                    }
                })?;
                Self::ReplicaGroup(ReplicaGroupStrategy::new(config, group))
            }
        };
        Ok(strategy)
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Random(_) => StrategyKind::Random,
            Self::Balanced(_) => StrategyKind::Balanced,
            Self::ReplicaGroup(_) => StrategyKind::ReplicaGroup,
        }
    }

    /// Pick the instances for a segment of `partition` and reserve their load.
    pub fn select(
        &mut self,
        partition: u32,
        replication: u32,
        pool: &InstancePool,
        mappings: &dyn MappingStore,
    ) -> PlacementResult<Selection> {
        match self {
            Self::Random(s) => s.select(pool, replication),
            Self::Balanced(s) => s.select(pool, replication),
            Self::ReplicaGroup(s) => s.select(partition, pool, mappings),
        }
    }

    /// Undo the counter increments of an unpublished selection.
    pub fn release(&mut self, reservation: &Reservation) {
        match (self, reservation) {
            (_, Reservation::Untracked) => {}
            (Self::Balanced(s), Reservation::Instances(instances)) => s.release(instances),
            (Self::ReplicaGroup(s), Reservation::Groups { partition, picks }) => {
                s.release(*partition, picks)
            }
            (strategy, reservation) => {
                tracing::warn!(
                    strategy = ?strategy.kind(),
                    ?reservation,
                    "reservation does not belong to this strategy, ignoring"
                );
            }
        }
    }

    /// Rebuild counters from placements that are already committed.
    pub fn seed(&mut self, view: &[SegmentPlacement]) {
        match self {
            Self::Random(_) => {}
            Self::Balanced(s) => s.seed(view),
            Self::ReplicaGroup(s) => s.seed(view),
        }
    }

    /// Current per-instance load as tracked by this strategy.
    ///
    /// Random assignment keeps no counters, so it always reports nothing.
    pub fn loads(&self) -> BTreeMap<InstanceId, u32> {
        match self {
            Self::Random(_) => BTreeMap::new(),
            Self::Balanced(s) => s.loads(),
            Self::ReplicaGroup(s) => s.loads(),
        }
    }

    pub fn mapping(&self) -> Option<&ReplicaGroupMapping> {
        match self {
            Self::ReplicaGroup(s) => s.mapping(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlacementError;
    use stratum_state::StateStore;

    fn pool(size: usize) -> InstancePool {
        InstancePool::from_ids("events", (0..size).map(|i| format!("server_{i}")))
    }

    #[test]
    fn builds_strategy_matching_config() {
        let random = TableConfig::new("t", StrategyKind::Random, 1);
        let balanced = TableConfig::new("t", StrategyKind::Balanced, 1);
        let groups = TableConfig::new("t", StrategyKind::ReplicaGroup, 2).with_replica_group(2, true);

        assert_eq!(
            AssignmentStrategy::for_table(&random, Some(1)).unwrap().kind(),
            StrategyKind::Random
        );
        assert_eq!(
            AssignmentStrategy::for_table(&balanced, None).unwrap().kind(),
            StrategyKind::Balanced
        );
        assert_eq!(
            AssignmentStrategy::for_table(&groups, None).unwrap().kind(),
            StrategyKind::ReplicaGroup
        );
    }

    #[test]
    fn invalid_config_is_a_configuration_error() {
        let config = TableConfig::new("t", StrategyKind::ReplicaGroup, 2);
        let err = AssignmentStrategy::for_table(&config, None).unwrap_err();
        assert!(matches!(err, PlacementError::Configuration(_)));
    }

    #[test]
    fn release_of_foreign_reservation_is_ignored() {
        let store = StateStore::open_in_memory().unwrap();
        let config = TableConfig::new("t", StrategyKind::Balanced, 2);
        let mut strategy = AssignmentStrategy::for_table(&config, None).unwrap();
        let selection = strategy.select(0, 2, &pool(4), &store).unwrap();

        strategy.release(&Reservation::Groups {
            partition: 0,
            picks: vec![(0, selection.instances[0].clone())],
        });
        assert_eq!(strategy.loads().values().sum::<u32>(), 2);

        strategy.release(&selection.reservation);
        assert!(strategy.loads().is_empty());
    }

    #[test]
    fn every_strategy_returns_distinct_replication_sized_sets() {
        let store = StateStore::open_in_memory().unwrap();
        let configs = [
            TableConfig::new("t", StrategyKind::Random, 3),
            TableConfig::new("t", StrategyKind::Balanced, 3),
            TableConfig::new("t", StrategyKind::ReplicaGroup, 3).with_replica_group(2, false),
        ];
        for config in configs {
            let mut strategy = AssignmentStrategy::for_table(&config, Some(7)).unwrap();
            for _ in 0..25 {
                let selection = strategy.select(0, 3, &pool(6), &store).unwrap();
                let mut unique = selection.instances.clone();
                unique.sort();
                unique.dedup();
                assert_eq!(selection.instances.len(), 3);
                assert_eq!(unique.len(), 3);
            }
        }
    }
}
