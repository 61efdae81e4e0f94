use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded FIFO shared between the worker and the host thread.
///
/// Producers push under a short lock. Consumers take everything at once with
/// [`drain`](Self::drain), which swaps in an empty buffer so producers are
/// never held up by delivery.
#[derive(Debug)]
pub struct ThreadSafeQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an item at the back.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Removes the front item, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Takes every queued item, oldest first, leaving the queue empty.
    pub fn drain(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.lock())
    }

    /// Discards every queued item.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panicking producer cannot leave a VecDeque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
