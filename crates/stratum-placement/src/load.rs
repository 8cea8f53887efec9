//! Per-instance segment counters with least-loaded selection.
//!
//! Not synchronized on its own: every tracker lives inside a table's
//! strategy state and is only touched under that table's lock, which makes
//! selection and increment one step.

use std::collections::{BTreeMap, HashMap};

use stratum_state::InstanceId;

/// Number of segments assigned to each instance within one scope.
#[derive(Debug, Clone, Default)]
pub struct LoadTracker {
    loads: HashMap<InstanceId, u32>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, instance: &str) -> u32 {
        self.loads.get(instance).copied().unwrap_or(0)
    }

    /// Positions of the `count` least-loaded candidates, lightest first.
    ///
    /// Ties go to the candidate that appears earlier in `candidates`.
    pub fn lightest(&self, candidates: &[InstanceId], count: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by_key(|&i| (self.load(&candidates[i]), i));
        order.truncate(count);
        order
    }

    pub fn increment(&mut self, instance: &str) {
        *self.loads.entry(instance.to_string()).or_insert(0) += 1;
    }

    /// Undo one increment. Counters never go below zero.
    pub fn decrement(&mut self, instance: &str) {
        if let Some(load) = self.loads.get_mut(instance) {
            *load = load.saturating_sub(1);
            if *load == 0 {
                self.loads.remove(instance);
            }
        }
    }

    /// Non-zero counters, ordered by instance id.
    pub fn snapshot(&self) -> BTreeMap<InstanceId, u32> {
        self.loads
            .iter()
            .map(|(id, load)| (id.clone(), *load))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.loads.values().map(|&l| u64::from(l)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<InstanceId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_tracker_picks_in_candidate_order() {
        let tracker = LoadTracker::new();
        let candidates = ids(&["a", "b", "c", "d"]);
        assert_eq!(tracker.lightest(&candidates, 2), vec![0, 1]);
    }

    #[test]
    fn lightest_prefers_lower_load() {
        let mut tracker = LoadTracker::new();
        tracker.increment("a");
        tracker.increment("b");
        let candidates = ids(&["a", "b", "c"]);
        assert_eq!(tracker.lightest(&candidates, 1), vec![2]);
        assert_eq!(tracker.lightest(&candidates, 3), vec![2, 0, 1]);
    }

    #[test]
    fn count_larger_than_candidates_is_truncated() {
        let tracker = LoadTracker::new();
        let candidates = ids(&["a"]);
        assert_eq!(tracker.lightest(&candidates, 3), vec![0]);
    }

    #[test]
    fn decrement_undoes_increment_and_saturates() {
        let mut tracker = LoadTracker::new();
        tracker.increment("a");
        tracker.increment("a");
        tracker.decrement("a");
        assert_eq!(tracker.load("a"), 1);

        tracker.decrement("a");
        tracker.decrement("a");
        assert_eq!(tracker.load("a"), 0);
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn repeated_selection_keeps_loads_within_one() {
        let mut tracker = LoadTracker::new();
        let candidates = ids(&["a", "b", "c", "d", "e"]);
        for _ in 0..17 {
            for i in tracker.lightest(&candidates, 2) {
                tracker.increment(&candidates[i]);
            }
        }
        let loads: Vec<u32> = candidates.iter().map(|c| tracker.load(c)).collect();
        let min = *loads.iter().min().unwrap();
        let max = *loads.iter().max().unwrap();
        assert!(max - min <= 1, "loads {loads:?}");
        assert_eq!(tracker.total(), 34);
    }
}
