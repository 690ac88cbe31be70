//! FIFO handoff from the driver callback thread to the delivery thread.
//!
//! The callback thread must never block, so [`TransferQueue::push`] is
//! unbounded and never waits. The consumer side blocks with a deadline and
//! can be cancelled cooperatively with [`TransferQueue::release`]: once
//! released, every blocking pop returns immediately without an item until the
//! queue is [`reset`](TransferQueue::reset) for the next run.

use crate::buffer::BufferHandle;
use crate::wait::deadline_after;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Result of a cancellable blocking pop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopOutcome<T> {
    /// An item was dequeued.
    Item(T),
    /// The queue has been released; no item was taken.
    Released,
    /// The deadline passed with the queue empty.
    TimedOut,
}

impl<T> PopOutcome<T> {
    /// The dequeued item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Released | Self::TimedOut => None,
        }
    }
}

/// A thread-safe FIFO with sticky cooperative cancellation.
///
/// Cloning is cheap and shares the same queue.
///
/// # Example
///
/// ```rust,ignore
/// use hwbridge::flow::{PopOutcome, TransferQueue};
///
/// let queue = TransferQueue::new();
///
/// // Callback thread
/// queue.push(handle);
///
/// // Delivery thread
/// match queue.pop_blocking_or_released(Duration::from_millis(100)) {
///     PopOutcome::Item(handle) => deliver(handle),
///     PopOutcome::Released => return,
///     PopOutcome::TimedOut => {}
/// }
/// ```
pub struct TransferQueue<T = BufferHandle> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    released: bool,
    total_pushed: u64,
    total_popped: u64,
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items currently queued.
    pub current: usize,
    /// Total items pushed.
    pub total_pushed: u64,
    /// Total items popped (blocking or not).
    pub total_popped: u64,
    /// Whether the queue is currently released.
    pub released: bool,
}

impl<T> TransferQueue<T> {
    /// Create an empty, non-released queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    released: false,
                    total_pushed: 0,
                    total_popped: 0,
                }),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Append an item and wake one waiter. Never blocks.
    pub fn push(&self, item: T) {
        let mut state = self.inner.state.lock();
        state.items.push_back(item);
        state.total_pushed += 1;
        drop(state);
        self.inner.not_empty.notify_one();
    }

    /// Pop the head item, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or if the queue is released.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<T> {
        self.pop_blocking_or_released(timeout).into_item()
    }

    /// Pop the head item without waiting.
    ///
    /// Ignores the release flag so queued items can be drained after a release.
    pub fn pop_nonblocking(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        let item = state.items.pop_front()?;
        state.total_popped += 1;
        Some(item)
    }

    /// Pop the head item, waiting up to `timeout`, unless released.
    ///
    /// The release flag is checked before emptiness on entry and after every
    /// wake-up, so a release always wins over a concurrent push.
    pub fn pop_blocking_or_released(&self, timeout: Duration) -> PopOutcome<T> {
        let deadline = deadline_after(timeout);
        let mut state = self.inner.state.lock();

        loop {
            if state.released {
                return PopOutcome::Released;
            }
            if let Some(item) = state.items.pop_front() {
                state.total_popped += 1;
                return PopOutcome::Item(item);
            }
            if self
                .inner
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                if state.released {
                    return PopOutcome::Released;
                }
                return match state.items.pop_front() {
                    Some(item) => {
                        state.total_popped += 1;
                        PopOutcome::Item(item)
                    }
                    None => PopOutcome::TimedOut,
                };
            }
        }
    }

    /// Release the queue: wake all waiters and make blocking pops return
    /// immediately until [`reset`](Self::reset). Idempotent.
    pub fn release(&self) {
        self.inner.state.lock().released = true;
        self.inner.not_empty.notify_all();
    }

    /// Clear the release flag for a new run. Queued items are kept.
    pub fn reset(&self) {
        self.inner.state.lock().released = false;
    }

    /// Whether the queue is released.
    pub fn is_released(&self) -> bool {
        self.inner.state.lock().released
    }

    /// Remove and return every queued item in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.inner.state.lock();
        let items: Vec<T> = state.items.drain(..).collect();
        state.total_popped += items.len() as u64;
        items
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            current: state.items.len(),
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            released: state.released,
        }
    }
}

impl<T> Default for TransferQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TransferQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for TransferQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TransferQueue")
            .field("len", &stats.current)
            .field("released", &stats.released)
            .finish()
    }
}
