//! Single-use completion value for blocking callers.
//!
//! Exchanges complete through callbacks invoked on the transport's task.
//! [`Completion`] turns such a callback into a blocking call: the callback
//! side calls [`Completion::complete`] once, the caller blocks in
//! [`Completion::wait`] or [`Completion::wait_timeout`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wsrest::completion::Completion;
//!
//! let completion = Completion::new();
//! let setter = completion.clone();
//! std::thread::spawn(move || {
//!     setter.complete(42);
//! });
//!
//! assert_eq!(completion.wait_timeout(Duration::from_secs(5)), Some(42));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Slot<T> {
    value: Option<T>,
    completed: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// A settable, wait-once value.
///
/// Only the first call to [`complete`](Completion::complete) has an effect.
/// The value is handed to exactly one waiter; cloning the handle shares the
/// same slot.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    /// Create an empty completion.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: None,
                    completed: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Store the value and wake waiters.
    ///
    /// Returns `false` if the completion was already set.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.completed {
            return false;
        }
        slot.completed = true;
        slot.value = Some(value);
        drop(slot);

        self.shared.ready.notify_all();
        true
    }

    /// True once [`complete`](Completion::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.shared.slot.lock().completed
    }

    /// Block until the value is available and take it.
    ///
    /// There is no timeout. If another waiter already took the value this
    /// keeps blocking, so use one waiter per completion.
    pub fn wait(&self) -> T {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return value;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`.
    ///
    /// Returns `None` if the value was not set in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.value.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_then_wait() {
        let completion = Completion::new();
        assert!(!completion.is_completed());
        assert!(completion.complete("done"));
        assert!(completion.is_completed());
        assert_eq!(completion.wait(), "done");
    }

    #[test]
    fn test_only_first_completion_counts() {
        let completion = Completion::new();
        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert_eq!(completion.wait(), 1);
    }

    #[test]
    fn test_wait_timeout_elapses() {
        let completion: Completion<u32> = Completion::new();
        let start = Instant::now();
        assert_eq!(completion.wait_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_across_threads() {
        let completion = Completion::new();
        let setter = completion.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            setter.complete(String::from("from thread"));
        });

        assert_eq!(completion.wait(), "from thread");
        handle.join().unwrap();
    }
}
