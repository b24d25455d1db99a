//! Sharded write pipeline (spec §4.7): N storage shards, each with its own
//! bounded queue and a configured number of batch workers. `write` hashes
//! the series' canonical labels to pick a shard, enqueues, and returns;
//! workers drain in batches and invoke the shard's sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tsdb_core::config::PipelineConfig;
use tsdb_core::error::Error;
use tsdb_core::{LabelSet, Sample};

use crate::persistent::PersistentQueue;

/// Consecutive write failures after which a shard reports unhealthy.
const UNHEALTHY_THRESHOLD: u64 = 5;

pub type WriteCallback = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// The storage-side target a pipeline shard drains into. Implemented by
/// the storage engine; kept as a trait here so this crate never depends on
/// `tsdb-storage`.
pub trait ShardSink: Send + Sync {
    fn append_series(&self, labels: LabelSet, samples: Vec<Sample>) -> Result<(), Error>;
}

struct WriteOp {
    labels: LabelSet,
    samples: Vec<Sample>,
    callback: Option<WriteCallback>,
    retry: u32,
}

struct Shard {
    queue: PersistentQueue<WriteOp>,
    sink: Arc<dyn ShardSink>,
    consecutive_failures: AtomicU64,
    /// Writes enqueued but not yet resolved (applied, terminally failed, or
    /// dropped). `drain` polls this down to zero rather than the queue's
    /// length, so an op a worker has already popped but not yet applied
    /// still counts as outstanding.
    pending: AtomicU64,
}

/// The sharded write pipeline. Owns one worker pool per shard; `write`
/// never blocks on disk I/O.
pub struct Pipeline {
    shards: Vec<Arc<Shard>>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Spawns `config.num_workers` worker threads per shard. `sinks.len()`
    /// must equal `config.num_shards`.
    pub fn start(config: PipelineConfig, sinks: Vec<Arc<dyn ShardSink>>) -> Self {
        assert_eq!(
            sinks.len(),
            config.num_shards,
            "one sink is required per configured shard"
        );
        let shards: Vec<Arc<Shard>> = sinks
            .into_iter()
            .map(|sink| {
                Arc::new(Shard {
                    queue: PersistentQueue::new(config.queue_size),
                    sink,
                    consecutive_failures: AtomicU64::new(0),
                    pending: AtomicU64::new(0),
                })
            })
            .collect();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(shards.len() * config.num_workers);
        for shard in &shards {
            for _ in 0..config.num_workers {
                let shard = Arc::clone(shard);
                let shutdown = Arc::clone(&shutdown);
                let batch_size = config.batch_size;
                let flush_interval = Duration::from_millis(config.flush_interval_ms);
                let retry_delay = Duration::from_millis(config.retry_delay_ms);
                let max_retries = config.max_retries;
                workers.push(thread::spawn(move || {
                    worker_loop(shard, shutdown, batch_size, flush_interval, retry_delay, max_retries)
                }));
            }
        }

        Self {
            shards,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, labels: &LabelSet) -> usize {
        let digest = blake3::hash(&labels.canonical_bytes());
        let n = u64::from_le_bytes(digest.as_bytes()[0..8].try_into().expect("8 bytes"));
        (n % self.shards.len() as u64) as usize
    }

    /// Enqueues `(labels, samples)` and invokes `callback` once the write
    /// has been attempted (possibly after retries). Returns `Shutdown` if
    /// `close` has already been called, `QueueFull` if the target shard's
    /// queue (and persistence sink, if any) both refuse the item.
    pub fn write(&self, labels: LabelSet, samples: Vec<Sample>, callback: WriteCallback) -> Result<(), Error> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        let idx = self.shard_for(&labels);
        let op = WriteOp {
            labels,
            samples,
            callback: Some(callback),
            retry: 0,
        };
        self.shards[idx].queue.push(op).map_err(|_| Error::QueueFull)?;
        self.shards[idx].pending.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_shard_healthy(&self, idx: usize) -> bool {
        self.shards[idx].consecutive_failures.load(Ordering::Relaxed) < UNHEALTHY_THRESHOLD
    }

    /// Blocks until every shard has applied, terminally failed, or dropped
    /// every write enqueued before this call returns — i.e. no shard has an
    /// outstanding op, whether still queued or mid-retry in a worker.
    pub fn drain(&self) {
        loop {
            let all_idle = self.shards.iter().all(|shard| shard.pending.load(Ordering::Acquire) == 0);
            if all_idle {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Sets the shutdown flag and joins every worker once its shard's
    /// queue has drained. New `write` calls fail fast with `Shutdown`.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    shard: Arc<Shard>,
    shutdown: Arc<AtomicBool>,
    batch_size: usize,
    flush_interval: Duration,
    retry_delay: Duration,
    max_retries: u32,
) {
    let mut last_flush = Instant::now();
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match shard.queue.pop() {
                Some(op) => batch.push(op),
                None => break,
            }
        }

        if batch.is_empty() {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            if last_flush.elapsed() >= flush_interval {
                last_flush = Instant::now();
            }
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        for mut op in batch {
            log::debug!("pipeline: applying write for series with {} samples", op.samples.len());
            let result = shard.sink.append_series(op.labels.clone(), op.samples.clone());
            match result {
                Ok(()) => {
                    shard.consecutive_failures.store(0, Ordering::Relaxed);
                    if let Some(cb) = op.callback.take() {
                        cb(Ok(()));
                    }
                    shard.pending.fetch_sub(1, Ordering::Release);
                }
                Err(Error::Transient(ref msg)) if op.retry < max_retries => {
                    log::warn!(
                        "pipeline: transient write failure (retry {}/{}): {msg}",
                        op.retry + 1,
                        max_retries
                    );
                    op.retry += 1;
                    thread::sleep(retry_delay);
                    if let Err(_dropped) = shard.queue.push(op) {
                        log::error!("pipeline: requeue after retry failed, queue and sink both full");
                        shard.pending.fetch_sub(1, Ordering::Release);
                    }
                }
                Err(e) => {
                    shard.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("pipeline: terminal write failure: {e}");
                    if let Some(cb) = op.callback.take() {
                        cb(Err(e));
                    }
                    shard.pending.fetch_sub(1, Ordering::Release);
                }
            }
        }
        last_flush = Instant::now();
    }
}
