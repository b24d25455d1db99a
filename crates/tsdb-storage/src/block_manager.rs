//! Tiered block manager (spec §4.3): owns sealed block bytes across three
//! on-disk tiers (0 = HOT, 1 = WARM, 2 = COLD), each its own directory
//! under `data_dir`.
//!
//! One exclusive lock guards the tier-membership map (`BlockId -> Tier`).
//! Plain `read`/`write` only hold it long enough to resolve a path; file
//! I/O happens outside the lock so unrelated tiers never contend.
//! `promote`/`demote` hold the lock for their full duration instead —
//! the only way to guarantee a concurrent reader sees the old tier or the
//! new one, never a dangling path in between.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tsdb_core::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    fn dir_name(self) -> &'static str {
        match self {
            Tier::Hot => "0",
            Tier::Warm => "1",
            Tier::Cold => "2",
        }
    }

    fn lower(self) -> Option<Tier> {
        match self {
            Tier::Hot => None,
            Tier::Warm => Some(Tier::Hot),
            Tier::Cold => Some(Tier::Warm),
        }
    }

    fn higher(self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

/// A block's identity plus the time range it covers, as returned by
/// `create`/`finalize`. The manager addresses files by `id` alone; the
/// range is metadata the storage engine uses to prune candidate blocks
/// without opening them. `BlockId` itself is a manager-assigned extension:
/// the raw block header has no unique identity (two blocks can share a
/// start/end window), so the manager needs its own key to name files.
#[derive(Debug, Clone, Copy)]
pub struct BlockHandle {
    pub id: BlockId,
    pub start_time: i64,
    pub end_time: i64,
}

/// Writes `bytes` to `path` and `sync_all()`s the file before returning, so a
/// block is durable on disk by the time the caller's write is acknowledged
/// rather than merely buffered in the page cache.
fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

pub struct BlockManager {
    data_dir: PathBuf,
    tier_map: Mutex<HashMap<BlockId, Tier>>,
    next_id: AtomicU64,
}

impl BlockManager {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let data_dir = data_dir.into();
        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            std::fs::create_dir_all(data_dir.join(tier.dir_name()))?;
        }
        Ok(Self {
            data_dir,
            tier_map: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn create(&self, start: i64, end: i64) -> Result<BlockHandle, Error> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "block start {start} is after end {end}"
            )));
        }
        let id = BlockId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tier_map.lock().insert(id, Tier::Hot);
        Ok(BlockHandle {
            id,
            start_time: start,
            end_time: end,
        })
    }

    /// Updates a handle's recorded range to match the sealed block's actual
    /// span, just before its bytes are written out.
    pub fn finalize(&self, handle: &mut BlockHandle, start: i64, end: i64) {
        handle.start_time = start;
        handle.end_time = end;
    }

    fn path_for(&self, id: BlockId, tier: Tier) -> PathBuf {
        self.data_dir.join(tier.dir_name()).join(format!("{:016x}.block", id.0))
    }

    fn tier_of(&self, id: BlockId) -> Result<Tier, Error> {
        self.tier_map.lock().get(&id).copied().ok_or(Error::NotFound)
    }

    pub fn write(&self, handle: &BlockHandle, bytes: &[u8]) -> Result<(), Error> {
        let tier = self.tier_of(handle.id)?;
        let path = self.path_for(handle.id, tier);
        write_and_sync(&path, bytes)
    }

    /// Reads a block's raw bytes and validates the header and, if the
    /// CHECKSUM flag is set, the payload crc32.
    pub fn read(&self, handle: &BlockHandle) -> Result<Vec<u8>, Error> {
        let tier = self.tier_of(handle.id)?;
        let path = self.path_for(handle.id, tier);
        let bytes = std::fs::read(&path)?;
        tsdb_block::Block::from_bytes(&bytes)?;
        Ok(bytes)
    }

    pub fn remove(&self, handle: &BlockHandle) -> Result<(), Error> {
        let tier = self.tier_of(handle.id)?;
        let path = self.path_for(handle.id, tier);
        std::fs::remove_file(&path)?;
        self.tier_map.lock().remove(&handle.id);
        Ok(())
    }

    pub fn tier(&self, id: BlockId) -> Option<Tier> {
        self.tier_map.lock().get(&id).copied()
    }

    pub fn promote(&self, handle: &BlockHandle) -> Result<(), Error> {
        let mut tier_map = self.tier_map.lock();
        let current = *tier_map.get(&handle.id).ok_or(Error::NotFound)?;
        let Some(target) = current.lower() else {
            return Ok(());
        };
        self.move_tier_locked(&mut tier_map, handle.id, current, target)
    }

    pub fn demote(&self, handle: &BlockHandle) -> Result<(), Error> {
        let mut tier_map = self.tier_map.lock();
        let current = *tier_map.get(&handle.id).ok_or(Error::NotFound)?;
        let Some(target) = current.higher() else {
            return Ok(());
        };
        self.move_tier_locked(&mut tier_map, handle.id, current, target)
    }

    fn move_tier_locked(
        &self,
        tier_map: &mut HashMap<BlockId, Tier>,
        id: BlockId,
        from: Tier,
        to: Tier,
    ) -> Result<(), Error> {
        let src = self.path_for(id, from);
        let dst = self.path_for(id, to);
        let bytes = std::fs::read(&src)?;
        write_and_sync(&dst, &bytes)?;
        match std::fs::remove_file(&src) {
            Ok(()) => {
                tier_map.insert(id, to);
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&dst);
                Err(Error::Io(e))
            }
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdb_block::Block;
    use tsdb_core::{LabelSet, Sample, SeriesId};

    fn sealed_block_bytes(start: i64, end: i64) -> Vec<u8> {
        let mut block = Block::create(start, end).unwrap();
        let labels = LabelSet::from_pairs([("__name__", "cpu"), ("host", "h1")]).unwrap();
        block.append(SeriesId(1), &labels, &Sample::new(start, 1.0)).unwrap();
        block.seal().unwrap();
        block.to_bytes().unwrap()
    }

    #[test]
    fn create_refuses_start_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        assert!(manager.create(100, 0).is_err());
    }

    #[test]
    fn new_block_starts_in_hot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        assert_eq!(manager.tier(handle.id), Some(Tier::Hot));
    }

    #[test]
    fn write_then_read_round_trips_and_validates_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        let bytes = sealed_block_bytes(0, 1000);
        manager.write(&handle, &bytes).unwrap();
        let read_back = manager.read(&handle).unwrap();
        assert_eq!(read_back, bytes);
    }

    #[test]
    fn promote_then_demote_round_trips_tier_and_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        let bytes = sealed_block_bytes(0, 1000);
        manager.write(&handle, &bytes).unwrap();

        manager.demote(&handle).unwrap();
        assert_eq!(manager.tier(handle.id), Some(Tier::Warm));
        assert_eq!(manager.read(&handle).unwrap(), bytes);

        manager.promote(&handle).unwrap();
        assert_eq!(manager.tier(handle.id), Some(Tier::Hot));
        assert_eq!(manager.read(&handle).unwrap(), bytes);
    }

    #[test]
    fn remove_deletes_file_and_membership() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        manager.write(&handle, &sealed_block_bytes(0, 1000)).unwrap();
        manager.remove(&handle).unwrap();
        assert!(manager.read(&handle).is_err());
    }

    #[test]
    fn read_detects_checksum_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        let mut bytes = sealed_block_bytes(0, 1000);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        manager.write(&handle, &bytes).unwrap();
        assert!(matches!(manager.read(&handle), Err(Error::Corrupt(_))));
    }

    #[test]
    fn promote_on_hot_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let handle = manager.create(0, 1000).unwrap();
        manager.promote(&handle).unwrap();
        assert_eq!(manager.tier(handle.id), Some(Tier::Hot));
    }

    #[test]
    fn finalize_updates_recorded_range() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BlockManager::open(dir.path()).unwrap();
        let mut handle = manager.create(0, 0).unwrap();
        manager.finalize(&mut handle, 5, 95);
        assert_eq!((handle.start_time, handle.end_time), (5, 95));
    }
}
