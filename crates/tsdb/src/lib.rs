//! # tsdb
//!
//! Public facade for the time-series storage core (spec §6): `Engine::init`
//! wires the sharded write pipeline on top of a [`tsdb_storage::StorageEngine`]
//! and exposes the engine API as a single type.

#![deny(unsafe_code)]

use std::sync::{Arc, OnceLock};

use tsdb_core::config::EngineConfig;
pub use tsdb_core::error::Error as EngineError;
use tsdb_core::{LabelMatcher, LabelSet, Sample, Series};
use tsdb_pipeline::{Pipeline, ShardSink, WriteCallback};
use tsdb_storage::StorageEngine;

struct Inner {
    storage: Arc<StorageEngine>,
    pipeline: Pipeline,
}

/// The engine's public handle. Default-constructed uninitialized; `init`
/// must be called exactly once before any other operation succeeds.
#[derive(Default)]
pub struct Engine {
    inner: OnceLock<Inner>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot initialization (spec §6). Builds the storage engine, then a
    /// sharded pipeline whose every shard drains into the same storage
    /// engine instance — `StorageEngine::append_series` re-routes each write
    /// to its own internal shard regardless of which pipeline shard called
    /// it, so one `Arc<StorageEngine>` can back every pipeline shard sink.
    pub fn init(&self, config: EngineConfig) -> Result<(), EngineError> {
        config
            .validate()
            .map_err(EngineError::InvalidArgument)?;
        let storage = Arc::new(StorageEngine::open(config.clone())?);
        let sinks: Vec<Arc<dyn ShardSink>> = (0..config.pipeline.num_shards)
            .map(|_| Arc::clone(&storage) as Arc<dyn ShardSink>)
            .collect();
        let pipeline = Pipeline::start(config.pipeline.clone(), sinks);
        self.inner
            .set(Inner { storage, pipeline })
            .map_err(|_| EngineError::AlreadyInitialized)
    }

    fn inner(&self) -> Result<&Inner, EngineError> {
        self.inner.get().ok_or(EngineError::NotInitialized)
    }

    /// Synchronous write: enqueues and blocks until the pipeline reports the
    /// outcome of the (possibly retried) append.
    pub fn write(&self, series: Series) -> Result<(), EngineError> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.write_async(series, Box::new(move |r| { let _ = tx.send(r); }))?;
        rx.recv().map_err(|_| EngineError::Shutdown)?
    }

    /// Enqueues `series` and invokes `callback` once the pipeline has
    /// attempted the write (possibly after internal retries).
    pub fn write_async(&self, series: Series, callback: WriteCallback) -> Result<(), EngineError> {
        let inner = self.inner()?;
        if series.samples.is_empty() {
            return Err(EngineError::InvalidArgument("series has no samples".into()));
        }
        inner.pipeline.write(series.labels, series.samples, callback)
    }

    pub fn read(&self, labels: &LabelSet, t_lo: i64, t_hi: i64) -> Result<Series, EngineError> {
        self.inner()?.storage.read(labels, t_lo, t_hi)
    }

    pub fn query(&self, matchers: &[LabelMatcher], t_lo: i64, t_hi: i64) -> Result<Vec<Series>, EngineError> {
        self.inner()?.storage.query(matchers, t_lo, t_hi)
    }

    pub fn label_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.inner()?.storage.label_names())
    }

    pub fn label_values(&self, name: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.inner()?.storage.label_values(name))
    }

    pub fn delete_series(&self, matchers: &[LabelMatcher]) -> Result<(), EngineError> {
        self.inner()?.storage.delete_series(matchers)
    }

    /// Blocks until every shard's pending writes have been applied (or
    /// terminally failed) and then seals and fsyncs all open blocks, so
    /// nothing enqueued before this call is lost or left in memory once it
    /// returns.
    pub fn flush(&self) -> Result<(), EngineError> {
        let inner = self.inner()?;
        inner.pipeline.drain();
        inner.storage.flush()
    }

    pub fn compact(&self) -> Result<(), EngineError> {
        self.inner()?.storage.compact()
    }

    /// Closes the pipeline (draining queues and joining workers) then
    /// flushes storage. Best-effort per spec §7: logs but does not abort on
    /// a partial failure.
    pub fn close(&self) -> Result<(), EngineError> {
        let inner = self.inner()?;
        inner.pipeline.close();
        match inner.storage.close() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("engine: close completed with a storage error: {e}");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> Result<String, EngineError> {
        Ok(self.inner()?.storage.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdb_core::config::PipelineConfig;

    fn test_config(dir: &tempfile::TempDir) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.data_dir = dir.path().to_string_lossy().into_owned();
        cfg.pipeline = PipelineConfig {
            num_shards: 2,
            queue_size: 64,
            batch_size: 8,
            num_workers: 1,
            flush_interval_ms: 10,
            retry_delay_ms: 5,
            max_retries: 1,
        };
        cfg
    }

    fn labels(name: &str, host: &str) -> LabelSet {
        LabelSet::from_pairs([("__name__", name), ("host", host)]).unwrap()
    }

    #[test]
    fn init_then_reinit_is_already_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new();
        engine.init(test_config(&dir)).unwrap();
        let err = engine.init(test_config(&dir));
        assert!(matches!(err, Err(EngineError::AlreadyInitialized)));
    }

    #[test]
    fn operations_before_init_are_not_initialized() {
        let engine = Engine::new();
        let err = engine.read(&labels("cpu", "h1"), 0, 100);
        assert!(matches!(err, Err(EngineError::NotInitialized)));
    }

    #[test]
    fn write_then_read_round_trips_through_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new();
        engine.init(test_config(&dir)).unwrap();

        let series = Series::new(labels("cpu", "h1"), vec![Sample::new(1, 1.0), Sample::new(2, 2.0)]);
        engine.write(series).unwrap();
        engine.flush().unwrap();

        let read = engine.read(&labels("cpu", "h1"), 0, 10).unwrap();
        assert_eq!(read.samples.len(), 2);
        engine.close().unwrap();
    }

    #[test]
    fn write_of_empty_series_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new();
        engine.init(test_config(&dir)).unwrap();
        let err = engine.write(Series::new(labels("cpu", "h1"), vec![]));
        assert!(matches!(err, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn query_finds_series_by_metric_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new();
        engine.init(test_config(&dir)).unwrap();

        engine.write(Series::new(labels("cpu", "h1"), vec![Sample::new(1, 1.0)])).unwrap();
        engine.write(Series::new(labels("cpu", "h2"), vec![Sample::new(1, 2.0)])).unwrap();
        engine.flush().unwrap();

        let matcher = LabelMatcher::equal("__name__", "cpu");
        let results = engine.query(&[matcher], 0, 10).unwrap();
        assert_eq!(results.len(), 2);
        engine.close().unwrap();
    }
}
