//! Sharded inverted index (spec §4.5): a fixed array of single-shard
//! indices, with scatter/gather `find` across shards and a per-metric
//! shard-present set for O(1) pruning when an equality matcher on
//! `__name__` narrows the search.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tsdb_core::label::METRIC_NAME_LABEL;
use tsdb_core::{LabelMatcher, LabelSet, MatchOp, SeriesId};

use crate::shard::IndexShard;

#[derive(Debug, Default)]
struct Counters {
    add_count: AtomicU64,
    lookup_count: AtomicU64,
    intersect_count: AtomicU64,
    total_time_nanos: AtomicU64,
}

/// A snapshot of the sharded index's aggregated counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexMetrics {
    pub add_count: u64,
    pub lookup_count: u64,
    pub intersect_count: u64,
    pub total_time_nanos: u64,
}

/// Fixed-size array of single-shard indices. Series route to shard
/// `id mod num_shards`.
pub struct ShardedIndex {
    shards: Vec<IndexShard>,
    metric_shards: RwLock<HashMap<String, HashSet<usize>>>,
    counters: Counters,
}

impl ShardedIndex {
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "num_shards must be > 0");
        Self {
            shards: (0..num_shards).map(|_| IndexShard::new()).collect(),
            metric_shards: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, id: SeriesId) -> usize {
        (id.as_u64() % self.shards.len() as u64) as usize
    }

    pub fn add(&self, id: SeriesId, labels: LabelSet) {
        let start = Instant::now();
        let shard_idx = self.shard_for(id);
        if let Some(metric) = labels.metric_name() {
            self.metric_shards
                .write()
                .entry(metric.to_string())
                .or_default()
                .insert(shard_idx);
        }
        self.shards[shard_idx].add(id, labels);
        self.counters.add_count.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_time_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    /// Removes `id`. Does not prune `metric_shards` (over-approximating the
    /// shard-present set is always safe — it only costs an extra shard
    /// visited on a future `find`, never a missed match).
    pub fn remove(&self, id: SeriesId) {
        let shard_idx = self.shard_for(id);
        self.shards[shard_idx].remove(id);
    }

    pub fn get_labels(&self, id: SeriesId) -> Option<LabelSet> {
        self.shards[self.shard_for(id)].get_labels(id)
    }

    pub fn find(&self, matchers: &[LabelMatcher]) -> Vec<SeriesId> {
        self.find_with_labels(matchers)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub fn find_with_labels(&self, matchers: &[LabelMatcher]) -> Vec<(SeriesId, LabelSet)> {
        let start = Instant::now();
        let candidate_shards = self.candidate_shards(matchers);

        let results: Vec<(SeriesId, LabelSet)> = std::thread::scope(|scope| {
            let handles: Vec<_> = candidate_shards
                .iter()
                .map(|&idx| {
                    let shard = &self.shards[idx];
                    scope.spawn(move || shard.find_with_labels(matchers))
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        });

        self.counters.lookup_count.fetch_add(1, Ordering::Relaxed);
        if matchers.iter().any(LabelMatcher::is_equality) {
            self.counters.intersect_count.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .total_time_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        results
    }

    fn candidate_shards(&self, matchers: &[LabelMatcher]) -> Vec<usize> {
        let metric_eq = matchers
            .iter()
            .find(|m| m.op == MatchOp::Equal && m.name == METRIC_NAME_LABEL);
        match metric_eq {
            Some(m) => self
                .metric_shards
                .read()
                .get(&m.value)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
            None => (0..self.shards.len()).collect(),
        }
    }

    pub fn metrics(&self) -> IndexMetrics {
        IndexMetrics {
            add_count: self.counters.add_count.load(Ordering::Relaxed),
            lookup_count: self.counters.lookup_count.load(Ordering::Relaxed),
            intersect_count: self.counters.intersect_count.load(Ordering::Relaxed),
            total_time_nanos: self.counters.total_time_nanos.load(Ordering::Relaxed),
        }
    }

    pub fn reset_metrics(&self) {
        self.counters.add_count.store(0, Ordering::Relaxed);
        self.counters.lookup_count.store(0, Ordering::Relaxed);
        self.counters.intersect_count.store(0, Ordering::Relaxed);
        self.counters.total_time_nanos.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(name: &str, host: &str) -> LabelSet {
        LabelSet::from_pairs([("__name__", name), ("host", host)]).unwrap()
    }

    #[test]
    fn routes_by_id_modulo_shard_count() {
        let index = ShardedIndex::new(4);
        for i in 0..20u64 {
            index.add(SeriesId(i), labels("cpu", &format!("h{i}")));
        }
        for i in 0..20u64 {
            assert!(index.get_labels(SeriesId(i)).is_some());
        }
    }

    #[test]
    fn find_scatters_and_gathers_across_shards() {
        let index = ShardedIndex::new(8);
        for i in 0..100u64 {
            index.add(SeriesId(i), labels("cpu", &format!("h{i}")));
        }
        let found = index.find(&[LabelMatcher::equal("host", "h42")]);
        assert_eq!(found, vec![SeriesId(42)]);
    }

    #[test]
    fn metric_name_equality_prunes_to_present_shards() {
        let index = ShardedIndex::new(8);
        index.add(SeriesId(1), labels("cpu", "h1"));
        index.add(SeriesId(9), labels("mem", "h2"));
        let found = index.find(&[LabelMatcher::equal("__name__", "cpu")]);
        assert_eq!(found, vec![SeriesId(1)]);
    }

    #[test]
    fn remove_then_find_returns_nothing() {
        let index = ShardedIndex::new(4);
        index.add(SeriesId(1), labels("cpu", "h1"));
        index.remove(SeriesId(1));
        assert!(index.find(&[LabelMatcher::equal("host", "h1")]).is_empty());
    }

    #[test]
    fn metrics_accumulate_and_reset() {
        let index = ShardedIndex::new(2);
        index.add(SeriesId(1), labels("cpu", "h1"));
        index.find(&[LabelMatcher::equal("host", "h1")]);
        let metrics = index.metrics();
        assert_eq!(metrics.add_count, 1);
        assert_eq!(metrics.lookup_count, 1);
        index.reset_metrics();
        assert_eq!(index.metrics(), IndexMetrics::default());
    }
}
