//! Least-loaded assignment.
//!
//! Every segment goes to the `replication` instances currently holding the
//! fewest segments of the table, ties broken by pool order. With a fixed
//! pool this keeps any two instances within one segment of each other.

use std::collections::BTreeMap;

use stratum_state::{InstanceId, SegmentPlacement};
use tracing::debug;

use crate::error::PlacementResult;
use crate::load::LoadTracker;
use crate::pool::InstancePool;
use crate::strategy::{Reservation, Selection};

#[derive(Debug, Default)]
pub struct BalancedStrategy {
    loads: LoadTracker,
}

impl BalancedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, pool: &InstancePool, replication: u32) -> PlacementResult<Selection> {
        let replication = replication as usize;
        pool.require(replication)?;

        let mut picked = self.loads.lightest(pool.instances(), replication);
        picked.sort_unstable();
        let instances: Vec<InstanceId> = picked
            .into_iter()
            .map(|i| pool.instances()[i].clone())
            .collect();
        for id in &instances {
            self.loads.increment(id);
        }

        debug!(?instances, "balanced selection");
        Ok(Selection {
            instances: instances.clone(),
            reservation: Reservation::Instances(instances),
        })
    }

    pub fn release(&mut self, instances: &[InstanceId]) {
        for id in instances {
            self.loads.decrement(id);
        }
    }

    pub fn seed(&mut self, view: &[SegmentPlacement]) {
        for placement in view {
            for id in &placement.instances {
                self.loads.increment(id);
            }
        }
    }

    pub fn loads(&self) -> BTreeMap<InstanceId, u32> {
        self.loads.snapshot()
    }
}
