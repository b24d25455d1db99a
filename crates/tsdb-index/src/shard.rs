//! Single-shard inverted index (spec §4.4).
//!
//! Two tables live under one reader-writer lock: `postings` maps
//! `(labelName, labelValue)` to a `PostingList`, and `forward` maps
//! `SeriesID -> LabelSet`. The invariant the lock protects: an id appears
//! in a posting list iff the forward table's label set for that id
//! contains that `(name, value)` pair.

use std::collections::HashMap;

use parking_lot::RwLock;
use roaring::RoaringTreemap;
use tsdb_core::{LabelMatcher, LabelSet, MatchOp, SeriesId};

/// A compressed set of series ids sharing one label `(name, value)`.
#[derive(Debug, Default, Clone)]
pub struct PostingList(RoaringTreemap);

impl PostingList {
    pub fn len(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: SeriesId) -> bool {
        self.0.contains(id.as_u64())
    }

    pub fn iter(&self) -> impl Iterator<Item = SeriesId> + '_ {
        self.0.iter().map(SeriesId)
    }
}

#[derive(Debug, Default)]
struct ShardState {
    postings: HashMap<(String, String), PostingList>,
    forward: HashMap<SeriesId, LabelSet>,
}

/// A single shard of the inverted index, guarded by one reader-writer lock.
#[derive(Debug, Default)]
pub struct IndexShard {
    state: RwLock<ShardState>,
}

impl IndexShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` into every `(name, value)` posting list named by
    /// `labels` and records the forward entry. O(L) in the number of
    /// labels.
    pub fn add(&self, id: SeriesId, labels: LabelSet) {
        let mut state = self.state.write();
        for (name, value) in labels.iter() {
            let key = (name.to_string(), value.to_string());
            state.postings.entry(key).or_default().0.insert(id.as_u64());
        }
        state.forward.insert(id, labels);
    }

    /// Removes `id` from every posting list it belongs to and drops the
    /// forward entry. Posting lists that become empty are erased.
    pub fn remove(&self, id: SeriesId) {
        let mut state = self.state.write();
        let Some(labels) = state.forward.remove(&id) else {
            return;
        };
        for (name, value) in labels.iter() {
            let key = (name.to_string(), value.to_string());
            if let Some(list) = state.postings.get_mut(&key) {
                list.0.remove(id.as_u64());
                if list.is_empty() {
                    state.postings.remove(&key);
                }
            }
        }
    }

    pub fn get_labels(&self, id: SeriesId) -> Option<LabelSet> {
        self.state.read().forward.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidate ids after intersecting every equality matcher's posting
    /// list (tightest selection first is naturally achieved by folding
    /// intersections in matcher order since roaring intersection cost
    /// scales with the smaller operand). Non-equality matchers are applied
    /// afterward as a post-filter over the forward table.
    pub fn find(&self, matchers: &[LabelMatcher]) -> Vec<SeriesId> {
        self.find_with_labels(matchers)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub fn find_with_labels(&self, matchers: &[LabelMatcher]) -> Vec<(SeriesId, LabelSet)> {
        let state = self.state.read();
        let equalities: Vec<&LabelMatcher> = matchers.iter().filter(|m| m.is_equality()).collect();
        let others: Vec<&LabelMatcher> = matchers.iter().filter(|m| !m.is_equality()).collect();

        let mut candidates: Option<RoaringTreemap> = None;
        for m in &equalities {
            let key = (m.name.clone(), m.value.clone());
            let bitmap = state
                .postings
                .get(&key)
                .map(|p| p.0.clone())
                .unwrap_or_default();
            candidates = Some(match candidates {
                Some(acc) => acc & bitmap,
                None => bitmap,
            });
            if candidates.as_ref().is_some_and(RoaringTreemap::is_empty) {
                return Vec::new();
            }
        }

        let ids: Vec<SeriesId> = match candidates {
            Some(bitmap) => bitmap.iter().map(SeriesId).collect(),
            None => state.forward.keys().copied().collect(),
        };

        ids.into_iter()
            .filter_map(|id| state.forward.get(&id).map(|labels| (id, labels.clone())))
            .filter(|(_, labels)| others.iter().all(|m| matches_other(m, labels)))
            .collect()
    }
}

fn matches_other(m: &LabelMatcher, labels: &LabelSet) -> bool {
    debug_assert!(!matches!(m.op, MatchOp::Equal));
    m.matches(labels)
}
