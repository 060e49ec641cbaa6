//! Mutex-protected bounded FIFO of [`Snapshot`]s.
//!
//! Wraps [`crate::util::circular_queue::CircularQueue`] (oldest-evicted on
//! overflow) with the lock and the newest-first accessor the supervisor's
//! dump path needs.

use std::sync::Mutex;

use crate::snapshot::Snapshot;
use crate::util::circular_queue::CircularQueue;

pub struct RingBuffer {
    inner: Mutex<CircularQueue<Snapshot>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            inner: Mutex::new(CircularQueue::new(capacity)),
        }
    }

    /// Pushes a snapshot, evicting the oldest if the buffer is full.
    pub fn push(&self, snapshot: Snapshot) {
        let mut queue = self.inner.lock().expect("ring buffer mutex poisoned");
        queue.push(snapshot);
    }

    /// Returns up to `n` most recent snapshots, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<Snapshot> {
        let queue = self.inner.lock().expect("ring buffer mutex poisoned");
        let take = n.min(queue.len());
        queue.iter().rev().take(take).cloned().collect()
    }

    pub fn count(&self) -> usize {
        let queue = self.inner.lock().expect("ring buffer mutex poisoned");
        queue.len()
    }

    pub fn capacity(&self) -> usize {
        let queue = self.inner.lock().expect("ring buffer mutex poisoned");
        queue.capacity()
    }
}
