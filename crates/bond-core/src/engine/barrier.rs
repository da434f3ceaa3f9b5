//! Counting completion barrier
//!
//! Collects one settlement per task and runs a continuation exactly once,
//! on whichever task settles last.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

type Continuation<T> = Box<dyn FnOnce(Vec<T>) + Send>;

/// Barrier over `count` settlements of type `T`
pub struct CompletionBarrier<T> {
    remaining: AtomicUsize,
    settled: Mutex<Vec<T>>,
    on_complete: Mutex<Option<Continuation<T>>>,
}

impl<T: Send> CompletionBarrier<T> {
    /// Create a barrier that fires `on_complete` after `count` settlements
    ///
    /// A zero count fires immediately with no settlements.
    pub fn new<F>(count: usize, on_complete: F) -> Self
    where
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        let barrier = Self {
            remaining: AtomicUsize::new(count),
            settled: Mutex::new(Vec::with_capacity(count)),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };
        if count == 0 {
            barrier.fire();
        }
        barrier
    }

    /// Record one settlement
    ///
    /// Settlements beyond the declared count are ignored.
    pub fn settle(&self, value: T) {
        self.settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);

        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.fire();
        }
    }

    /// Settlements still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let continuation = self
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(continuation) = continuation {
            let settled =
                std::mem::take(&mut *self.settled.lock().unwrap_or_else(PoisonError::into_inner));
            continuation(settled);
        }
    }
}
