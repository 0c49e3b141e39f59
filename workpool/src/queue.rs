use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A FIFO queue that hands items from producer threads to consumer threads.
///
/// The WorkQueue is the only shared mutable state between a `ThreadPool` and
/// its workers. Producers push jobs, and each worker blocks in
/// [`blocking_pop`](Self::blocking_pop) until a job becomes available.
///
/// # Thread Safety
/// - One mutex guards the underlying sequence; it is never read or modified
///   without holding it
/// - One condition variable signals "the sequence became non-empty"
/// - Waits re-check the predicate, so spurious wakeups are harmless
///
/// # Ordering
/// Items leave the queue in exactly the order they entered it, whichever
/// thread pushed or pops them.
///
/// The queue is unbounded; `push` never blocks beyond lock contention.
pub struct WorkQueue<T> {
    /// Pending items, front is the oldest
    items: Mutex<VecDeque<T>>,

    /// Signalled once per push
    available: Condvar,
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    // No user code runs while the lock is held, so a poisoned lock still
    // guards a consistent sequence.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item at the back of the queue and wakes one waiting consumer.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Removes the front item without waiting.
    ///
    /// # Returns
    /// * `Some(item)` - the oldest queued item
    /// * `None` - the queue is empty
    pub fn nonblocking_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Removes the front item, suspending the caller while the queue is empty.
    pub fn blocking_pop(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            // Re-checked on every wakeup, spurious or not
            items = self
                .available
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`blocking_pop`](Self::blocking_pop), but gives up after `timeout`.
    ///
    /// # Returns
    /// * `Some(item)` - an item arrived before the deadline
    /// * `None` - the queue stayed empty for the whole timeout
    pub fn blocking_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let (mut items, _) = self
            .available
            .wait_timeout_while(self.lock(), timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        items.pop_front()
    }

    /// Removes every queued item in FIFO order under a single lock acquisition.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Checks if the queue is empty.
    ///
    /// This is a snapshot and may change by the time the value is used.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Gets the number of queued items.
    ///
    /// This is a snapshot and may change by the time the value is used.
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
