//! # Offline Queue
//!
//! Holds outbound frames while the socket is down.
//!
//! ```text
//! 1. When open: frames are transmitted immediately
//! 2. When closed: frames queue locally, oldest dropped at capacity
//! 3. On reopen: the queue is flushed in original order
//! ```

use std::collections::VecDeque;

/// Default maximum number of queued frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bounded FIFO with drop-oldest eviction.
#[derive(Debug, Clone)]
pub struct OfflineQueue<T> {
    /// Pending items, oldest first.
    pending: VecDeque<T>,
    /// Maximum queue size (oldest items dropped when exceeded).
    max_size: usize,
}

impl<T> Default for OfflineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OfflineQueue<T> {
    /// Create a new empty queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue with a custom max size.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_size,
        }
    }

    /// Enqueue an item, returning the evicted oldest item if the queue was full.
    ///
    /// A zero-capacity queue hands the item straight back.
    pub fn enqueue(&mut self, item: T) -> Option<T> {
        if self.max_size == 0 {
            return Some(item);
        }
        let dropped = if self.pending.len() >= self.max_size {
            self.pending.pop_front()
        } else {
            None
        };
        self.pending.push_back(item);
        dropped
    }

    /// Remove the oldest item.
    pub fn pop_front(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    /// Put an item back at the head, e.g. after a failed transmit.
    pub fn push_front(&mut self, item: T) {
        self.pending.push_front(item);
    }

    /// Get the number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Capacity of the queue.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Peek at pending items without removing them.
    #[must_use]
    pub fn pending(&self) -> &VecDeque<T> {
        &self.pending
    }

    /// Keep only the items matching `keep`, preserving order.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.pending.retain(keep);
    }

    /// Take all pending items.
    pub fn take_pending(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }

    /// Clear all pending items.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
