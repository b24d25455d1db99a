//! Per-shard storage engine (spec §4.8): orchestrates the inverted index,
//! per-shard block manager, and the active block to serve
//! `append_series`/`read`/`query` and the auxiliary operations from
//! spec §6.
//!
//! The engine partitions its own state into shards keyed by
//! `SeriesId % num_shards`; this is independent of whichever shard a
//! `tsdb-pipeline::Pipeline` routed a write through (that scheme hashes
//! labels directly). One `StorageEngine` can back every pipeline shard's
//! `ShardSink` since `append_series` resolves the right internal shard
//! itself.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tsdb_block::Block;
use tsdb_core::config::EngineConfig;
use tsdb_core::error::Error;
use tsdb_core::series::SeriesIdAllocator;
use tsdb_core::{LabelMatcher, LabelSet, Sample, Series, SeriesId};
use tsdb_index::ShardedIndex;
use tsdb_pipeline::ShardSink;

use crate::block_manager::{BlockHandle, BlockManager};

/// Handle, sealed-so-far column buffer, record count, and the wall-clock
/// instant the block was created — the last field backs rotation predicate
/// (iii) (spec §4.2: "wall-clock time since block.start_time >=
/// block_duration").
type ActiveBlock = (BlockHandle, Block, u64, Instant);

struct ShardState {
    block_manager: BlockManager,
    active: Option<ActiveBlock>,
    sealed: Vec<BlockHandle>,
    last_timestamp: HashMap<SeriesId, i64>,
}

struct Shard {
    state: RwLock<ShardState>,
}

impl Shard {
    fn open(data_dir: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self {
            state: RwLock::new(ShardState {
                block_manager: BlockManager::open(data_dir.as_ref().to_path_buf())?,
                active: None,
                sealed: Vec::new(),
                last_timestamp: HashMap::new(),
            }),
        })
    }
}

/// The orchestrator described in spec §4.8. Owns one `Shard` (index +
/// block manager + active block) per configured pipeline shard count.
pub struct StorageEngine {
    config: EngineConfig,
    index: ShardedIndex,
    shards: Vec<Shard>,
    allocator: SeriesIdAllocator,
}

impl StorageEngine {
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        config.validate().map_err(Error::InvalidArgument)?;
        let num_shards = config.pipeline.num_shards;
        let mut shards = Vec::with_capacity(num_shards);
        for i in 0..num_shards {
            let dir = Path::new(&config.data_dir).join(format!("shard-{i}"));
            shards.push(Shard::open(dir)?);
        }
        Ok(Self {
            index: ShardedIndex::new(num_shards),
            shards,
            allocator: SeriesIdAllocator::new(),
            config,
        })
    }

    fn shard_for(&self, id: SeriesId) -> &Shard {
        &self.shards[(id.as_u64() % self.shards.len() as u64) as usize]
    }

    /// Resolves `labels` to a `SeriesId`, indexing a fresh one on first
    /// sight. Mirrors `SeriesIdAllocator::derive`'s hash-then-verify
    /// contract: the common path is the `blake3`-derived id; only a
    /// verified collision (existing entry with different labels) falls
    /// back to the monotonic counter.
    fn resolve_id(&self, labels: &LabelSet) -> SeriesId {
        let candidate = self.allocator.derive(labels);
        match self.index.get_labels(candidate) {
            Some(existing) if existing == *labels => candidate,
            Some(_) => {
                let fallback = self.allocator.allocate_fallback();
                self.index.add(fallback, labels.clone());
                fallback
            }
            None => {
                self.index.add(candidate, labels.clone());
                candidate
            }
        }
    }

    /// Write path (spec §4.8): validate, resolve the series id, append
    /// samples in ascending-timestamp order to the shard's active block,
    /// rotating when any of the three predicates from spec §4.2 fires:
    /// record count, byte size, or wall-clock age since the block's
    /// creation.
    pub fn append_series(&self, labels: LabelSet, samples: Vec<Sample>) -> Result<(), Error> {
        if samples.is_empty() {
            return Err(Error::InvalidArgument("series has no samples".into()));
        }
        let id = self.resolve_id(&labels);
        let shard = self.shard_for(id);
        let mut state = shard.state.write();

        let mut ordered = samples;
        ordered.sort_by_key(|s| s.timestamp_ms);

        for sample in ordered {
            if let Some(&last) = state.last_timestamp.get(&id) {
                if sample.timestamp_ms <= last {
                    return Err(Error::Ordering {
                        last,
                        timestamp: sample.timestamp_ms,
                    });
                }
            }
            if state.active.is_none() {
                let handle = state
                    .block_manager
                    .create(sample.timestamp_ms, sample.timestamp_ms)?;
                let block = Block::create(sample.timestamp_ms, sample.timestamp_ms)?;
                state.active = Some((handle, block, 0, Instant::now()));
            }
            {
                let (_, block, count, _) = state.active.as_mut().expect("just initialized above");
                block.append(id, &labels, &sample)?;
                *count += 1;
            }
            state.last_timestamp.insert(id, sample.timestamp_ms);

            let should_rotate = {
                let (_, block, count, created_at) = state.active.as_ref().expect("set above");
                *count >= self.config.block.max_block_records
                    || block.size() >= self.config.block.max_block_size
                    || created_at.elapsed() >= Duration::from_secs(self.config.block.block_duration_secs)
            };
            if should_rotate {
                self.seal_active(&mut state)?;
            }
        }
        Ok(())
    }

    fn seal_active(&self, state: &mut ShardState) -> Result<(), Error> {
        let Some((mut handle, mut block, _, _)) = state.active.take() else {
            return Ok(());
        };
        block.seal()?;
        state
            .block_manager
            .finalize(&mut handle, block.start_time(), block.end_time());
        let bytes = block.to_bytes()?;
        state.block_manager.write(&handle, &bytes)?;
        state.sealed.push(handle);
        Ok(())
    }

    /// Read path (spec §4.8): exact-label lookup, then merge every
    /// intersecting block (sealed and active) in timestamp order.
    pub fn read(&self, labels: &LabelSet, t_lo: i64, t_hi: i64) -> Result<Series, Error> {
        if t_lo > t_hi {
            return Err(Error::InvalidArgument(format!(
                "reversed time range [{t_lo}, {t_hi}]"
            )));
        }
        let id = self.allocator.derive(labels);
        match self.index.get_labels(id) {
            Some(existing) if existing == *labels => {}
            _ => return Err(Error::NotFound),
        }
        let samples = self.collect_samples(id, t_lo, t_hi)?;
        Ok(Series::new(labels.clone(), samples))
    }

    fn collect_samples(&self, id: SeriesId, t_lo: i64, t_hi: i64) -> Result<Vec<Sample>, Error> {
        let shard = self.shard_for(id);
        let state = shard.state.read();
        let mut merged: std::collections::BTreeMap<i64, Sample> = std::collections::BTreeMap::new();

        for handle in state
            .sealed
            .iter()
            .filter(|h| h.start_time <= t_hi && h.end_time >= t_lo)
        {
            let bytes = state.block_manager.read(handle)?;
            let block = Block::from_bytes(&bytes)?;
            if !block.contains(id) {
                continue;
            }
            for decoded in block.samples(id)? {
                if decoded.timestamp_ms >= t_lo && decoded.timestamp_ms <= t_hi {
                    merged.insert(
                        decoded.timestamp_ms,
                        Sample::with_fields(decoded.timestamp_ms, decoded.value, decoded.fields),
                    );
                }
            }
        }
        if let Some((_, block, _, _)) = &state.active {
            if block.contains(id) {
                for decoded in block.samples(id)? {
                    if decoded.timestamp_ms >= t_lo && decoded.timestamp_ms <= t_hi {
                        merged.insert(
                            decoded.timestamp_ms,
                            Sample::with_fields(decoded.timestamp_ms, decoded.value, decoded.fields),
                        );
                    }
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Query path (spec §4.8): `find_with_labels` on the sharded index,
    /// then read each match, dropping empty results.
    pub fn query(&self, matchers: &[LabelMatcher], t_lo: i64, t_hi: i64) -> Result<Vec<Series>, Error> {
        if t_lo > t_hi {
            return Err(Error::InvalidArgument(format!(
                "reversed time range [{t_lo}, {t_hi}]"
            )));
        }
        let mut out = Vec::new();
        for (id, labels) in self.index.find_with_labels(matchers) {
            let samples = self.collect_samples(id, t_lo, t_hi)?;
            if !samples.is_empty() {
                out.push(Series::new(labels, samples));
            }
        }
        Ok(out)
    }

    pub fn label_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for (_, labels) in self.index.find_with_labels(&[]) {
            for (name, _) in labels.iter() {
                names.insert(name.to_string());
            }
        }
        names.into_iter().collect()
    }

    pub fn label_values(&self, name: &str) -> Vec<String> {
        let mut values = BTreeSet::new();
        for (_, labels) in self.index.find_with_labels(&[]) {
            if let Some(v) = labels.get(name) {
                values.insert(v.to_string());
            }
        }
        values.into_iter().collect()
    }

    /// Removes matching series from the index and from per-series ordering
    /// state only; persisted sealed blocks are left untouched. Per spec §9's
    /// open question, the original only removes series metadata and
    /// active-block state, so this crate follows that rather than rewriting
    /// persisted blocks.
    pub fn delete_series(&self, matchers: &[LabelMatcher]) -> Result<(), Error> {
        for (id, _) in self.index.find_with_labels(matchers) {
            self.index.remove(id);
            let shard = self.shard_for(id);
            shard.state.write().last_timestamp.remove(&id);
        }
        Ok(())
    }

    /// Seals every shard's active block so its bytes are durable on disk.
    pub fn flush(&self) -> Result<(), Error> {
        for shard in &self.shards {
            let mut state = shard.state.write();
            self.seal_active(&mut state)?;
        }
        Ok(())
    }

    /// Merges runs of `compaction_threshold_blocks` sealed blocks per shard
    /// into one larger block apiece. Each series' samples stay strictly
    /// increasing across the merge because the source blocks are replayed
    /// oldest-first and were already internally ordered.
    pub fn compact(&self) -> Result<(), Error> {
        let threshold = self.config.block.compaction_threshold_blocks;
        if threshold < 2 {
            return Ok(());
        }
        for shard in &self.shards {
            let mut state = shard.state.write();
            while state.sealed.len() >= threshold {
                self.compact_run(&mut state, threshold)?;
            }
        }
        Ok(())
    }

    fn compact_run(&self, state: &mut ShardState, run_len: usize) -> Result<(), Error> {
        let run: Vec<BlockHandle> = state.sealed.drain(..run_len).collect();
        let mut decoded_blocks = Vec::with_capacity(run.len());
        for handle in &run {
            let bytes = state.block_manager.read(handle)?;
            decoded_blocks.push(Block::from_bytes(&bytes)?);
        }

        let start = run.iter().map(|h| h.start_time).min().unwrap_or(0);
        let end = run.iter().map(|h| h.end_time).max().unwrap_or(0);
        let mut merged = Block::create(start, end)?;

        let mut series_ids = Vec::new();
        let mut seen = HashSet::new();
        for block in &decoded_blocks {
            for id in block.series_ids() {
                if seen.insert(id) {
                    series_ids.push(id);
                }
            }
        }
        for id in series_ids {
            let Some(labels) = self.index.get_labels(id) else {
                continue;
            };
            for block in &decoded_blocks {
                if !block.contains(id) {
                    continue;
                }
                for decoded in block.samples(id)? {
                    merged.append(
                        id,
                        &labels,
                        &Sample::with_fields(decoded.timestamp_ms, decoded.value, decoded.fields),
                    )?;
                }
            }
        }
        merged.seal()?;
        let mut handle = state
            .block_manager
            .create(merged.start_time(), merged.end_time())?;
        state
            .block_manager
            .finalize(&mut handle, merged.start_time(), merged.end_time());
        let bytes = merged.to_bytes()?;
        state.block_manager.write(&handle, &bytes)?;
        for old in &run {
            state.block_manager.remove(old)?;
        }
        state.sealed.push(handle);
        Ok(())
    }

    /// Best-effort close (spec §7): flushes every shard, logging rather
    /// than failing fast on a partial error, and returns `Ok` only if every
    /// shard drained cleanly.
    pub fn close(&self) -> Result<(), Error> {
        let mut first_err = None;
        for shard in &self.shards {
            let mut state = shard.state.write();
            if let Err(e) = self.seal_active(&mut state) {
                log::error!("storage engine: close failed to seal a shard's active block: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> String {
        let metrics = self.index.metrics();
        let per_shard: Vec<serde_json::Value> = self
            .shards
            .iter()
            .map(|shard| {
                let state = shard.state.read();
                serde_json::json!({
                    "sealed_blocks": state.sealed.len(),
                    "active_block_samples": state.active.as_ref().map(|(_, b, _, _)| b.num_samples()).unwrap_or(0),
                    "tracked_series": state.last_timestamp.len(),
                })
            })
            .collect();
        serde_json::json!({
            "index": {
                "add_count": metrics.add_count,
                "lookup_count": metrics.lookup_count,
                "intersect_count": metrics.intersect_count,
            },
            "shards": per_shard,
        })
        .to_string()
    }
}

impl ShardSink for StorageEngine {
    fn append_series(&self, labels: LabelSet, samples: Vec<Sample>) -> Result<(), Error> {
        StorageEngine::append_series(self, labels, samples)
    }
}
