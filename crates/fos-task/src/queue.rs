//! Concurrent Queue
//!
//! Lock-free multi-producer, multi-consumer queue that transports task
//! handles between producers and workers. Enqueue never blocks, dequeue is
//! best-effort and ordering is not part of the contract.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::task::{Task, TaskExecutor};

/// Unbounded MPMC queue
pub struct ConcurrentQueue<T> {
    /// Segmented lock-free storage
    items: SegQueue<T>,
    /// Approximate length
    len: AtomicUsize,
}

impl<T> ConcurrentQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Push an item (never blocks)
    pub fn push(&self, item: T) {
        // Count first so a racing pop can never take `len` below zero
        self.len.fetch_add(1, Ordering::AcqRel);
        self.items.push(item);
    }

    /// Try to take one item
    ///
    /// Each pushed item is handed out exactly once.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.pop();
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get approximate length
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Drop every queued item, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        while self.try_pop().is_some() {
            removed += 1;
        }
        removed
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// A bare queue is a valid task target: queued tasks wait here until
/// someone pops and executes them.
impl TaskExecutor for ConcurrentQueue<Task> {
    fn enqueue(&self, task: Task) {
        self.push(task);
    }
}
