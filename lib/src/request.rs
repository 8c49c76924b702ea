//! Per-request state shared between the host's worker thread and the filter.

mod panic_info;
mod wait;

pub use self::panic_info::PanicInfo;
pub(crate) use self::panic_info::{classify, PanicKind};

use {
    self::wait::{WaitOutcome, WaitPoint},
    crate::{
        error::HostError,
        filter::StreamFilter,
        handle::{FinalizeReason, HostRequest, RequestKey},
        host::{Host, LocalReply},
        logging::{self, LogLevel},
        status::Status,
    },
    std::{
        fmt,
        sync::{
            atomic::{AtomicBool, AtomicU8, Ordering},
            Arc, Mutex, MutexGuard, PoisonError,
        },
    },
    tracing::{event, Level},
};

/// Where a request is in its life, as seen by the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Registered, but no filter has been installed yet.
    Created = 0,
    /// A filter is installed and the request is flowing.
    Active = 1,
    /// The filter is parked in [`HttpRequest::suspend`].
    Suspended = 2,
    /// The host's destroy callback is being processed.
    Destroying = 3,
    /// Destroy has completed; the filter is gone and the host handle is invalid.
    Released = 4,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Lifecycle::Created,
            1 => Lifecycle::Active,
            2 => Lifecycle::Suspended,
            3 => Lifecycle::Destroying,
            _ => Lifecycle::Released,
        }
    }

    /// Whether the host has started tearing the request down.
    pub fn is_closed(self) -> bool {
        matches!(self, Lifecycle::Destroying | Lifecycle::Released)
    }
}

/// The bridge's record of one in-flight request.
///
/// Filters receive an `Arc<HttpRequest>` from their factory and use it to call back into the
/// host. After the host destroys the request every such call fails with
/// [`HostError::FilterDestroyed`] without reaching the host.
pub struct HttpRequest {
    handle: HostRequest,
    host: Arc<dyn Host>,
    concurrency: u32,
    filter: Mutex<Option<Box<dyn StreamFilter>>>,
    wait: WaitPoint,
    panic_info: Mutex<PanicInfo>,
    lifecycle: AtomicU8,
    /// Cleared for state that never took ownership of its key.
    owns_key: AtomicBool,
}

impl HttpRequest {
    pub(crate) fn new(handle: HostRequest, host: Arc<dyn Host>, concurrency: u32) -> Arc<Self> {
        Arc::new(Self {
            handle,
            host,
            concurrency,
            filter: Mutex::new(None),
            wait: WaitPoint::default(),
            panic_info: Mutex::new(PanicInfo::default()),
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
            owns_key: AtomicBool::new(true),
        })
    }

    pub fn key(&self) -> RequestKey {
        self.handle.key()
    }

    pub fn plugin_name(&self) -> &str {
        self.handle.plugin_name()
    }

    pub fn config_id(&self) -> u64 {
        self.handle.config_id()
    }

    /// The number of worker threads the host runs.
    pub fn worker_concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// A snapshot of the failure state of this request.
    pub fn panic_info(&self) -> PanicInfo {
        lock(&self.panic_info).clone()
    }

    /// Answer the request with a synthesized response.
    ///
    /// The filter should return [`Status::LocalReply`] from the phase that called this.
    pub fn send_local_reply(&self, reply: LocalReply) -> Result<(), HostError> {
        self.ensure_open()?;
        self.host.send_local_reply(self.key(), reply)
    }

    /// Resume a filter chain that was parked by returning [`Status::Running`].
    pub fn continue_request(&self, status: Status) -> Result<(), HostError> {
        self.ensure_open()?;
        self.host.continue_request(self.key(), status)
    }

    /// Block the calling thread until the host signals that the awaited operation for this
    /// request has completed.
    ///
    /// Returns [`HostError::FilterDestroyed`] if the request is destroyed before or while
    /// waiting; the caller must then abandon whatever it was doing for the request. A resume
    /// signal that arrives before this is called is not lost.
    pub fn suspend(&self) -> Result<(), HostError> {
        self.ensure_open()?;
        let _ = self.lifecycle.compare_exchange(
            Lifecycle::Active as u8,
            Lifecycle::Suspended as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        event!(Level::TRACE, request = %self.key(), "filter suspended");
        match self.wait.wait() {
            WaitOutcome::Resumed => {
                let _ = self.lifecycle.compare_exchange(
                    Lifecycle::Suspended as u8,
                    Lifecycle::Active as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                event!(Level::TRACE, request = %self.key(), "filter resumed");
                Ok(())
            }
            WaitOutcome::Closed => Err(HostError::FilterDestroyed),
        }
    }

    /// Write a message to the host's log, tagged with this request's plugin.
    pub fn log(&self, level: LogLevel, msg: &str) {
        logging::write_entry(self.plugin_name(), level, msg);
    }

    fn ensure_open(&self) -> Result<(), HostError> {
        if self.lifecycle().is_closed() {
            Err(HostError::FilterDestroyed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn install_filter(&self, filter: Box<dyn StreamFilter>) {
        *lock(&self.filter) = Some(filter);
        let _ = self.lifecycle.compare_exchange(
            Lifecycle::Created as u8,
            Lifecycle::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Run `f` against the installed filter. Returns `None` if there is no filter.
    ///
    /// The filter slot stays locked for the duration of `f`, so a panic inside `f` must be
    /// caught by the caller before it can observe the slot again.
    pub(crate) fn with_filter<T>(&self, f: impl FnOnce(&mut dyn StreamFilter) -> T) -> Option<T> {
        let mut slot = lock(&self.filter);
        slot.as_mut().map(|filter| f(filter.as_mut()))
    }

    pub(crate) fn take_filter(&self) -> Option<Box<dyn StreamFilter>> {
        lock(&self.filter).take()
    }

    pub(crate) fn panicked(&self) -> bool {
        lock(&self.panic_info).panicked
    }

    pub(crate) fn record_panic(&self, details: String) {
        let mut info = lock(&self.panic_info);
        info.panicked = true;
        info.details = details;
    }

    /// Deliver the terminal reply for a recorded failure.
    pub(crate) fn send_panic_reply(&self, details: &str) -> Result<(), HostError> {
        self.ensure_open()?;
        self.host.send_panic_reply(self.key(), details)
    }

    /// Wake the filter if it is suspended, or bank the signal if it has not suspended yet.
    pub(crate) fn resume(&self) {
        self.wait.resume();
    }

    /// Start teardown: refuse further host calls and release any suspended waiter.
    pub(crate) fn begin_destroy(&self) {
        self.lifecycle
            .store(Lifecycle::Destroying as u8, Ordering::Release);
        if self.wait.close() > 0 {
            event!(
                Level::DEBUG,
                request = %self.key(),
                "releasing suspended filter for destroy"
            );
        }
    }

    pub(crate) fn mark_released(&self) {
        self.lifecycle
            .store(Lifecycle::Released as u8, Ordering::Release);
    }

    /// Mark state that lost a registration race, so dropping it does not finalize a key that
    /// still belongs to a live request.
    pub(crate) fn disown(&self) {
        self.owns_key.store(false, Ordering::Release);
    }

    /// Drop the filter without calling into it, for whole-process teardown.
    pub(crate) fn abandon(&self) {
        self.wait.close();
        drop(self.take_filter());
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("handle", &self.handle)
            .field("lifecycle", &self.lifecycle())
            .field("panic_info", &self.panic_info())
            .finish_non_exhaustive()
    }
}

impl Drop for HttpRequest {
    fn drop(&mut self) {
        if !self.owns_key.load(Ordering::Acquire) {
            return;
        }
        let reason = if self.lifecycle() == Lifecycle::Released {
            FinalizeReason::Normal
        } else {
            event!(
                Level::WARN,
                request = %self.key(),
                lifecycle = ?self.lifecycle(),
                "request state released without a destroy callback"
            );
            FinalizeReason::Abandoned
        };
        self.host.finalize(self.key(), reason);
    }
}

/// A panicking filter or host call must not wedge the request, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
