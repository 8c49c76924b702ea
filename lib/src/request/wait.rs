//! The suspend/resume primitive behind [`HttpRequest::suspend`][super::HttpRequest::suspend].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// How a wait on a [`WaitPoint`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The host signalled that the awaited operation completed.
    Resumed,
    /// The request was destroyed while (or before) waiting.
    Closed,
}

#[derive(Debug, Default)]
struct WaitState {
    /// A resume signal not yet consumed by a waiter.
    permit: bool,
    waiters: u32,
    closed: bool,
}

/// A wake-up point shared between the thread that suspends a filter and whatever thread
/// delivers the host's resume signal.
///
/// A signal that arrives before the filter starts waiting is kept as a permit, so the race
/// between an async completion and the suspend call cannot lose a wake-up. At most one
/// permit is held: repeated signals collapse into one and wake a single wait.
#[derive(Debug, Default)]
pub(crate) struct WaitPoint {
    state: Mutex<WaitState>,
    cond: Condvar,
}

impl WaitPoint {
    /// Block until a resume signal is available or the wait point is closed.
    pub(crate) fn wait(&self) -> WaitOutcome {
        let mut state = self.lock();
        state.waiters += 1;
        let outcome = loop {
            if state.permit {
                state.permit = false;
                break WaitOutcome::Resumed;
            }
            if state.closed {
                break WaitOutcome::Closed;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        state.waiters -= 1;
        outcome
    }

    /// Deliver a resume signal, waking one waiter if there is one.
    pub(crate) fn resume(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.permit = true;
        self.cond.notify_one();
    }

    /// Wake every waiter with [`WaitOutcome::Closed`] and make all later waits return
    /// immediately. Unconsumed resume signals are discarded.
    ///
    /// Returns the number of waiters that were parked at the time.
    pub(crate) fn close(&self) -> u32 {
        let mut state = self.lock();
        state.closed = true;
        state.permit = false;
        self.cond.notify_all();
        state.waiters
    }

    #[cfg(test)]
    pub(crate) fn waiters(&self) -> u32 {
        self.lock().waiters
    }

    fn lock(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
