//! # tsdb-index
//!
//! The inverted label index (spec §4.4/§4.5): a single-shard index backed
//! by roaring-bitmap posting lists under one reader-writer lock, and a
//! sharded index that fans `find` out across shards and tracks a
//! per-metric shard-present set for pruning.

#![deny(unsafe_code)]

pub mod shard;
pub mod sharded;

pub use shard::{IndexShard, PostingList};
pub use sharded::{IndexMetrics, ShardedIndex};
