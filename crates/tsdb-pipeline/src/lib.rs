//! # tsdb-pipeline
//!
//! The ingest-side concurrency primitives (spec §4.6/§4.7): a lock-free
//! bounded MPMC queue with optional persistence spillover, and the sharded
//! write pipeline that routes series to shards by label hash and drains
//! them through worker pools into a caller-supplied [`ShardSink`].

#![allow(unsafe_code)]

pub mod persistent;
pub mod pipeline;
pub mod queue;

pub use persistent::{PersistenceSink, PersistentQueue};
pub use pipeline::{Pipeline, ShardSink, WriteCallback};
pub use queue::BoundedQueue;
