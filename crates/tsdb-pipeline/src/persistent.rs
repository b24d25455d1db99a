//! Optional persistence spillover for the bounded queue (spec §4.6): when a
//! producer observes the ring full, the item is offered to a user-provided
//! sink instead of being rejected outright. A symmetric hook loads spilled
//! items back in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::queue::BoundedQueue;

/// A user-provided persistence backend (typically file-append-based).
/// `spill` returns the number of bytes written on success, or hands the
/// item back on failure so the caller can still treat it as `NotAccepted`.
pub trait PersistenceSink<T>: Send + Sync {
    fn spill(&self, item: T) -> Result<u64, T>;
    fn reload(&self) -> Vec<T>;
}

/// A bounded queue with optional overflow persistence and counters for
/// items that took the spillover path.
pub struct PersistentQueue<T> {
    ring: BoundedQueue<T>,
    sink: Option<Arc<dyn PersistenceSink<T>>>,
    persisted_count: AtomicU64,
    persisted_bytes: AtomicU64,
}

impl<T> PersistentQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: BoundedQueue::new(capacity),
            sink: None,
            persisted_count: AtomicU64::new(0),
            persisted_bytes: AtomicU64::new(0),
        }
    }

    pub fn with_persistence(capacity: usize, sink: Arc<dyn PersistenceSink<T>>) -> Self {
        Self {
            ring: BoundedQueue::new(capacity),
            sink: Some(sink),
            persisted_count: AtomicU64::new(0),
            persisted_bytes: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Pushes `value`. On a full ring, falls back to the persistence sink
    /// (if any); returns the value back to the caller only when both the
    /// ring and the sink refuse it.
    pub fn push(&self, value: T) -> Result<(), T> {
        match self.ring.try_push(value) {
            Ok(()) => Ok(()),
            Err(value) => match &self.sink {
                Some(sink) => match sink.spill(value) {
                    Ok(bytes) => {
                        self.persisted_count.fetch_add(1, Ordering::Relaxed);
                        self.persisted_bytes.fetch_add(bytes, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(value) => Err(value),
                },
                None => Err(value),
            },
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.ring.try_pop()
    }

    /// Loads any items previously spilled to the persistence sink. Callers
    /// typically re-enqueue these at startup.
    pub fn reload_persisted(&self) -> Vec<T> {
        self.sink.as_ref().map(|s| s.reload()).unwrap_or_default()
    }

    pub fn persisted_stats(&self) -> (u64, u64) {
        (
            self.persisted_count.load(Ordering::Relaxed),
            self.persisted_bytes.load(Ordering::Relaxed),
        )
    }
}
