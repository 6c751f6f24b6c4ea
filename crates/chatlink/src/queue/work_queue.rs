//! Unbounded FIFO of pending work items with wake-up signaling

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Thread-safe FIFO feeding a single [`DispatchLoop`](super::DispatchLoop)
///
/// `enqueue` never blocks and never rejects while the queue is open. The
/// not-empty signal is raised only on the empty → non-empty transition and
/// outside the lock; `Notify` keeps a permit if the dispatcher is not waiting
/// yet, so a wake-up is never lost.
pub struct WorkQueue<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    not_empty: Notify,
    closed: AtomicBool,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue name (used in logs)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item to the tail
    ///
    /// Returns `false` only when the queue has been closed; the item is dropped
    /// in that case and the queue stays consistent.
    pub fn enqueue(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(queue = %self.name, "Enqueue rejected: queue closed");
            return false;
        }

        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.push_back(item);
            was_empty
        };

        if was_empty {
            self.not_empty.notify_one();
        }
        true
    }

    /// Remove the item at the head, if any
    pub fn dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Current number of pending items
    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wait until the queue holds at least one item or is closed
    ///
    /// Returns `false` once the queue is closed and drained.
    pub async fn wait_not_empty(&self) -> bool {
        loop {
            let notified = self.not_empty.notified();
            if !self.is_empty() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            notified.await;
        }
    }

    /// Stop accepting new items and wake the dispatcher
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(queue = %self.name, pending = self.size(), "Queue closed");
        }
        self.not_empty.notify_one();
    }

    /// Check if the queue was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
