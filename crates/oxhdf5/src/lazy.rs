//! Once-only lazy initialization shared between threads.
//!
//! Every lazily computed value in this crate (object headers, attribute
//! maps, the chunk lookup, decoded chunks) goes through a [`Lazy`] cell,
//! which guarantees:
//!
//! 1. initialization runs at most once across all threads;
//! 2. concurrent `get` calls during initialization block and then observe
//!    the same result;
//! 3. an initialization failure is cached and re-raised to every waiter
//!    and every later caller.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

enum State<T, E> {
    Uninit,
    Initializing,
    Ready(Arc<T>),
    Failed(E),
}

/// A thread-safe write-once cell computed on first access.
pub struct Lazy<T, E> {
    state: Mutex<State<T, E>>,
    ready: Condvar,
}

impl<T, E: Clone> Lazy<T, E> {
    /// An uninitialized cell.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninit),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the value, running `init` if this is the first access.
    ///
    /// Exactly one caller runs `init`; everyone else blocks until it
    /// finishes and then shares the outcome, success or failure.
    pub fn get<F>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut guard = self.lock();
        loop {
            match &*guard {
                State::Ready(value) => return Ok(value.clone()),
                State::Failed(error) => return Err(error.clone()),
                State::Initializing => {
                    guard = self
                        .ready
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                State::Uninit => {
                    *guard = State::Initializing;
                    drop(guard);

                    // If `init` unwinds, put the cell back so another
                    // caller can retry instead of waiting forever.
                    let reset = ResetOnUnwind { cell: self };
                    let result = init();
                    std::mem::forget(reset);

                    let mut guard = self.lock();
                    let out = match result {
                        Ok(value) => {
                            let value = Arc::new(value);
                            *guard = State::Ready(value.clone());
                            Ok(value)
                        }
                        Err(error) => {
                            *guard = State::Failed(error.clone());
                            Err(error)
                        }
                    };
                    self.ready.notify_all();
                    return out;
                }
            }
        }
    }

    /// Has a value been stored successfully?
    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock(), State::Ready(_))
    }

    /// Peek at the value without initializing.
    pub fn peek(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T, E: Clone> Default for Lazy<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

struct ResetOnUnwind<'a, T, E: Clone> {
    cell: &'a Lazy<T, E>,
}

impl<T, E: Clone> Drop for ResetOnUnwind<'_, T, E> {
    fn drop(&mut self) {
        *self.cell.lock() = State::Uninit;
        self.cell.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn initializes_once() {
        let cell: Lazy<u32, String> = Lazy::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..5 {
            let value = cell
                .get(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .unwrap();
            assert_eq!(*value, 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(cell.is_ready());
    }

    #[test]
    fn failure_is_cached() {
        let cell: Lazy<u32, String> = Lazy::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            let err = cell
                .get(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                })
                .unwrap_err();
            assert_eq!(err, "boom");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!cell.is_ready());
    }

    #[test]
    fn peek_does_not_initialize() {
        let cell: Lazy<u32, String> = Lazy::new();
        assert!(cell.peek().is_none());
        cell.get(|| Ok(7)).unwrap();
        assert_eq!(*cell.peek().unwrap(), 7);
    }

    #[test]
    fn concurrent_getters_share_one_run() {
        let cell: Arc<Lazy<u64, String>> = Arc::new(Lazy::new());
        let runs = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cell = Arc::clone(&cell);
                let runs = Arc::clone(&runs);
                scope.spawn(move || {
                    let value = cell
                        .get(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(99)
                        })
                        .unwrap();
                    assert_eq!(*value, 99);
                });
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_init_allows_retry() {
        let cell: Arc<Lazy<u32, String>> = Arc::new(Lazy::new());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.get(|| -> Result<u32, String> { panic!("init blew up") })
        }));
        assert!(result.is_err());

        // The cell must not be stuck in Initializing.
        assert_eq!(*cell.get(|| Ok(5)).unwrap(), 5);
    }
}
