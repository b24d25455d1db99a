//! # tsdb-storage
//!
//! The tiered block manager (spec §4.3) and the per-shard storage engine
//! (spec §4.8) that orchestrates the inverted index, block manager, and
//! active block into `append_series`/`read`/`query` and friends.

#![deny(unsafe_code)]

pub mod block_manager;
pub mod engine;

pub use block_manager::{BlockHandle, BlockId, BlockManager, Tier};
pub use engine::StorageEngine;
