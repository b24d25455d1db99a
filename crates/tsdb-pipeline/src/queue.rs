//! Bounded lock-free MPMC queue (spec §4.6), Dmitry Vyukov's ring-buffer
//! algorithm.
//!
//! # Design
//!
//! Each slot carries a sequence number alongside its value cell. A slot is
//! free for a producer at position `pos` iff `sequence == pos`, and full
//! for a consumer iff `sequence == pos + 1`. Producers and consumers race
//! only on a single `compare_exchange` of their respective position
//! counter; no lock is ever held while spinning.
//!
//! # Safety
//!
//! Slot values live in an `UnsafeCell<MaybeUninit<T>>` so a full slot can
//! be written by a producer and read by a consumer without a lock. The
//! sequence-number protocol is the single source of truth for whether a
//! slot's value is initialized; reading or writing one outside the
//! protocol's rules is undefined behavior.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer ring buffer of capacity `C > 0`.
pub struct BoundedQueue<T> {
    buffer: Box<[Slot<T>]>,
    capacity: usize,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        let buffer = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            capacity,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts to enqueue `value`. Returns `Err(value)` (the spec's
    /// `NotAccepted`) if the queue is observed full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue a value. Returns `None` (the spec's
    /// `NotAvailable`) if the queue is observed empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos as isize + 1);
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence.store(pos + self.capacity, Ordering::Release);
                        return Some(value);
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_single_threaded() {
        let q = BoundedQueue::new(4);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn reports_full_when_at_capacity() {
        let q = BoundedQueue::new(2);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert_eq!(q.try_push(3), Err(3));
    }

    #[test]
    fn wraps_around_after_draining() {
        let q = BoundedQueue::new(2);
        for i in 0..10 {
            q.try_push(i).unwrap();
            assert_eq!(q.try_pop(), Some(i));
        }
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_all_items() {
        let q = Arc::new(BoundedQueue::new(64));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let item = p * 1000 + i;
                        while q.try_push(item).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || loop {
                    match q.try_pop() {
                        Some(v) => consumed.lock().push(v),
                        None => {
                            if consumed.lock().len() >= 4000 {
                                return;
                            }
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }
        let mut got = consumed.lock().clone();
        got.sort_unstable();
        let expected: Vec<i32> = (0..4000).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn drop_releases_remaining_items() {
        #[derive(Debug)]
        struct DropCounter(Arc<std::sync::atomic::AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let q = BoundedQueue::new(4);
        q.try_push(DropCounter(Arc::clone(&count))).unwrap();
        q.try_push(DropCounter(Arc::clone(&count))).unwrap();
        drop(q);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
