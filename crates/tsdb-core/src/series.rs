//! Series identity and the public read/query result type (spec §3/§6).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::label::LabelSet;
use crate::sample::Sample;

/// A 64-bit series identifier, stable for the life of the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(pub u64);

impl SeriesId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Derives `SeriesId`s from canonical label sets and hands out fallback ids
/// on a verified hash collision.
///
/// Lookup `LabelSet -> SeriesId` is total and O(1) amortized: the common
/// path hashes the canonical bytes with `blake3` and truncates to 64 bits.
/// A collision is only possible when two distinct label sets hash to the
/// same 64-bit prefix; the caller (the inverted index's forward table)
/// detects this by comparing the stored label set, and only then requests
/// a fallback id from the monotonic counter here, so the common case never
/// touches shared counter state.
#[derive(Debug, Default)]
pub struct SeriesIdAllocator {
    counter: AtomicU64,
}

impl SeriesIdAllocator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Deterministic hash-derived id for a label set.
    pub fn derive(&self, labels: &LabelSet) -> SeriesId {
        let digest = blake3::hash(&labels.canonical_bytes());
        let bytes: [u8; 8] = digest.as_bytes()[0..8].try_into().expect("8 bytes");
        SeriesId(u64::from_le_bytes(bytes))
    }

    /// Allocates a fresh id from the monotonic counter, used only when the
    /// forward table has verified a hash collision against the derived id.
    pub fn allocate_fallback(&self) -> SeriesId {
        // High bit set so fallback ids never collide with the hash space
        // in practice, and are visually distinguishable in dumps/tests.
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        SeriesId(n | (1 << 63))
    }
}

/// The result of a `read`/`query` call: a label set paired with the
/// samples that satisfied the request's time range and matchers.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: LabelSet,
    pub samples: Vec<Sample>,
}

impl Series {
    pub fn new(labels: LabelSet, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
