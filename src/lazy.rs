use std::fmt;
use std::sync::{Mutex, PoisonError};

type Thunk<T> = Box<dyn FnOnce() -> T + Send>;

struct LazyInner<T> {
    thunk: Option<Thunk<T>>,
    value: Option<T>,
}

/// A lazily evaluated, memoizing cell.
///
/// The producer runs at most once, on the first `get()`; every later read
/// returns a clone of the memoized value. There is no invalidation — a slot
/// that needs recomputing is overwritten with a fresh cell instead.
///
/// The producer must not read the cell it is stored in; doing so would
/// deadlock the cell's lock.
pub struct Lazy<T> {
    inner: Mutex<LazyInner<T>>,
}

impl<T: Clone> Lazy<T> {
    /// Create an unevaluated cell from a producer.
    pub fn new(producer: impl FnOnce() -> T + Send + 'static) -> Self {
        Lazy {
            inner: Mutex::new(LazyInner {
                thunk: Some(Box::new(producer)),
                value: None,
            }),
        }
    }

    /// Create a cell that is already resolved to `value`.
    pub fn ready(value: T) -> Self {
        Lazy {
            inner: Mutex::new(LazyInner {
                thunk: None,
                value: Some(value),
            }),
        }
    }

    /// Evaluate the producer if it has not run yet and return the value.
    ///
    /// Concurrent readers block until the single evaluation finishes and
    /// then all observe the same result.
    pub fn get(&self) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(producer) = inner.thunk.take() {
            inner.value = Some(producer());
        }
        inner
            .value
            .clone()
            .expect("lazy cell constructed with neither thunk nor value")
    }

    /// Whether the cell has been evaluated (or was constructed resolved).
    pub fn is_resolved(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value
            .is_some()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy").finish_non_exhaustive()
    }
}
