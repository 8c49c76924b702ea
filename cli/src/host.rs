//! A [`Host`] that records what the bridge asks of it.

use {
    filter_bridge_lib::{FinalizeReason, Host, HostError, LocalReply, RequestKey, Status},
    std::{
        collections::HashMap,
        sync::{Condvar, Mutex, MutexGuard, PoisonError},
        time::{Duration, Instant},
    },
    tracing::{event, Level},
};

/// What happened to one request on the host side.
#[derive(Clone, Debug, Default)]
pub struct HostRecord {
    /// The local reply that terminated the request, if any.
    pub reply: Option<LocalReply>,
    /// Whether that reply was the bridge's failure reply.
    pub failed: bool,
    /// Directives passed back through `continue_request`, in order.
    pub continued: Vec<Status>,
    pub finalized: Option<FinalizeReason>,
}

#[derive(Default)]
struct State {
    records: HashMap<RequestKey, HostRecord>,
    /// Continuations not yet picked up by the worker that parked the request.
    pending: HashMap<RequestKey, Status>,
}

/// The harness's stand-in for the proxy core.
#[derive(Default)]
pub struct RecordingHost {
    state: Mutex<State>,
    changed: Condvar,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until some thread continues `key`, or `timeout` elapses.
    pub fn wait_for_continue(&self, key: RequestKey, timeout: Duration) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(status) = state.pending.remove(&key) {
                return Some(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until every key in `keys` has been finalized, or `timeout` elapses.
    ///
    /// Returns whether they all were.
    pub fn wait_for_finalized(&self, keys: &[RequestKey], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let done = keys.iter().all(|key| {
                state
                    .records
                    .get(key)
                    .map_or(false, |record| record.finalized.is_some())
            });
            let now = Instant::now();
            if done || now >= deadline {
                return done;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// A copy of everything recorded for `key`.
    pub fn record(&self, key: RequestKey) -> HostRecord {
        self.lock().records.get(&key).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Host for RecordingHost {
    fn send_local_reply(&self, key: RequestKey, reply: LocalReply) -> Result<(), HostError> {
        let mut state = self.lock();
        let record = state.records.entry(key).or_default();
        if record.reply.is_some() {
            return Err(HostError::RequestFinished);
        }
        event!(
            Level::DEBUG,
            request = %key,
            status = reply.status.as_u16(),
            "local reply"
        );
        record.reply = Some(reply);
        Ok(())
    }

    fn send_panic_reply(&self, key: RequestKey, details: &str) -> Result<(), HostError> {
        self.send_local_reply(key, LocalReply::panic_reply(details))?;
        self.lock().records.entry(key).or_default().failed = true;
        Ok(())
    }

    fn continue_request(&self, key: RequestKey, status: Status) -> Result<(), HostError> {
        let mut state = self.lock();
        state.records.entry(key).or_default().continued.push(status);
        state.pending.insert(key, status);
        self.changed.notify_all();
        Ok(())
    }

    fn finalize(&self, key: RequestKey, reason: FinalizeReason) {
        event!(Level::TRACE, request = %key, ?reason, "finalized");
        self.lock().records.entry(key).or_default().finalized = Some(reason);
        self.changed.notify_all();
    }
}
