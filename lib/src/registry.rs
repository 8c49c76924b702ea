//! The sharded request registry.
//!
//! One shard per host worker thread. A request is only ever looked up in the shard named by
//! the worker id embedded in its [`RequestKey`], and the host drives every lifecycle callback
//! for that request from the owning worker, so a shard's lock is uncontended apart from the
//! occasional resume signal arriving from another thread.

use {
    crate::{concurrency::WorkerConcurrency, error::RegistryError, handle::RequestKey},
    once_cell::sync::OnceCell,
    std::{
        collections::{hash_map::Entry, HashMap},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
    },
    tracing::{event, Level},
};

type Shard<R> = Mutex<HashMap<RequestKey, R>>;

/// Maps live request handles to their state, partitioned by worker.
///
/// `R` is the per-request value, [`Arc<HttpRequest>`][crate::request::HttpRequest] in the
/// bridge.
pub struct RequestRegistry<R = Arc<crate::request::HttpRequest>> {
    concurrency: WorkerConcurrency,
    shards: OnceCell<Box<[Shard<R>]>>,
}

impl<R: Clone> Default for RequestRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone> RequestRegistry<R> {
    pub const fn new() -> Self {
        Self {
            concurrency: WorkerConcurrency::new(),
            shards: OnceCell::new(),
        }
    }

    /// Allocate one empty shard per worker.
    ///
    /// Only the first call takes effect; later calls are no-ops and return `false`.
    pub fn initialize(&self, concurrency: u32) -> bool {
        let mut initialized = false;
        self.shards.get_or_init(|| {
            initialized = self.concurrency.initialize(concurrency);
            (0..concurrency)
                .map(|_| Mutex::new(HashMap::new()))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        if initialized {
            event!(Level::DEBUG, concurrency, "request registry initialized");
        }
        initialized
    }

    /// The worker concurrency this registry was initialized with.
    ///
    /// # Panics
    ///
    /// Panics if the registry has not been initialized.
    pub fn concurrency(&self) -> u32 {
        self.concurrency.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.concurrency.is_initialized()
    }

    /// Insert the state for a new request.
    ///
    /// An existing entry for the same key is left untouched and reported as
    /// [`RegistryError::DuplicateRequestKey`].
    pub fn store(&self, key: RequestKey, request: R) -> Result<(), RegistryError> {
        match self.shard(key).entry(key) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateRequestKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    /// Look up the state for a request, if it is live.
    pub fn lookup(&self, key: RequestKey) -> Option<R> {
        self.shard(key).get(&key).cloned()
    }

    /// Forget a request. Removing a key that is not present is a no-op.
    pub fn remove(&self, key: RequestKey) -> Option<R> {
        self.shard(key).remove(&key)
    }

    /// The number of live requests owned by one worker.
    pub fn len_for_worker(&self, worker_id: u32) -> usize {
        self.shard(RequestKey::new(0, worker_id)).len()
    }

    /// Empty every shard, returning what was in them.
    ///
    /// Only meant for whole-process teardown or reinitialization, never for per-request flow.
    pub fn reset_all(&self) -> Vec<R> {
        self.shards()
            .iter()
            .flat_map(|shard| {
                lock(shard)
                    .drain()
                    .map(|(_, request)| request)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn shards(&self) -> &[Shard<R>] {
        match self.shards.get() {
            Some(shards) => shards,
            None => panic!("request registry used before concurrency was initialized"),
        }
    }

    fn shard(&self, key: RequestKey) -> MutexGuard<'_, HashMap<RequestKey, R>> {
        let shards = self.shards();
        match shards.get(key.worker_id() as usize) {
            Some(shard) => lock(shard),
            None => panic!(
                "request {} names worker {} but only {} workers are configured",
                key,
                key.worker_id(),
                shards.len()
            ),
        }
    }
}

/// Shards hold no invariants a panicking holder could break half-way, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
