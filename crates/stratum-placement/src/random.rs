//! Uniform random assignment.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::PlacementResult;
use crate::pool::InstancePool;
use crate::strategy::{Reservation, Selection};

/// Picks `replication` distinct instances uniformly at random.
///
/// Keeps no counters. Load is uniform only in expectation.
#[derive(Debug)]
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    /// A fixed `seed` makes the sequence of selections reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn select(&mut self, pool: &InstancePool, replication: u32) -> PlacementResult<Selection> {
        let replication = replication as usize;
        pool.require(replication)?;
        let instances: Vec<_> = pool
            .instances()
            .choose_multiple(&mut self.rng, replication)
            .cloned()
            .collect();
        debug!(?instances, "random selection");
        Ok(Selection {
            instances,
            reservation: Reservation::Untracked,
        })
    }
}
