//! Worker concurrency, set once by the host before any request flows.

use once_cell::sync::OnceCell;

/// The number of worker threads the host runs.
///
/// Only the first call to [`initialize`][Self::initialize] takes effect. Reading the value
/// before that is a usage error and panics, since callers size per-worker resources from it.
#[derive(Debug, Default)]
pub struct WorkerConcurrency {
    value: OnceCell<u32>,
}

impl WorkerConcurrency {
    pub const fn new() -> Self {
        Self {
            value: OnceCell::new(),
        }
    }

    /// Record the worker count. Returns `true` if this call was the one that set it.
    pub fn initialize(&self, concurrency: u32) -> bool {
        self.value.set(concurrency).is_ok()
    }

    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// The configured worker count.
    ///
    /// # Panics
    ///
    /// Panics if called before [`initialize`][Self::initialize]. Do not read this while the
    /// host is still loading plugins; read it from a filter factory or a filter instead.
    pub fn get(&self) -> u32 {
        match self.value.get() {
            Some(concurrency) => *concurrency,
            None => panic!(
                "concurrency has not yet been initialized, do not access it before the host \
                 has initialized the bridge"
            ),
        }
    }
}
