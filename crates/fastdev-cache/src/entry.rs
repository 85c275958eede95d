//! Per-key state machine.
//!
//! `Idle -> Loading -> Ready`, back to `Idle` when a load fails, expires, or
//! is abandoned. While `Loading`, callers wait on the watch channel the loader
//! publishes its outcome to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{CacheError, CacheResult};

pub(crate) type Outcome = Option<Result<CacheResult, CacheError>>;

pub(crate) enum State {
    Idle,
    Loading(watch::Receiver<Outcome>),
    Ready {
        value: CacheResult,
        written_at: Instant,
        expire_after_write: Duration,
    },
}

impl State {
    /// The value, unless it has expired at `now`.
    pub(crate) fn fresh(&self, now: Instant) -> Option<&CacheResult> {
        match self {
            State::Ready {
                value,
                written_at,
                expire_after_write,
            } if !is_expired(*written_at, *expire_after_write, now) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match self {
            State::Ready {
                written_at,
                expire_after_write,
                ..
            } => is_expired(*written_at, *expire_after_write, now),
            _ => false,
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        matches!(self, State::Loading(_))
    }
}

/// A zero `expire_after_write` never expires.
pub(crate) fn is_expired(written_at: Instant, expire_after_write: Duration, now: Instant) -> bool {
    !expire_after_write.is_zero() && now.saturating_duration_since(written_at) > expire_after_write
}

pub(crate) struct Entry {
    pub(crate) state: Mutex<State>,
    /// Set by an invalidate that lands mid-load; the load's value is then
    /// handed to its callers without being kept.
    pub(crate) discard: AtomicBool,
}

impl Entry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
            discard: AtomicBool::new(false),
        }
    }
}

/// Puts an entry back to `Idle` if the loading future is dropped before it
/// publishes. Dropping the sender alongside wakes the waiters, which retry.
pub(crate) struct LoadingGuard<'a> {
    entry: &'a Entry,
    armed: bool,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn new(entry: &'a Entry) -> Self {
        Self { entry, armed: true }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.entry.state.lock();
            if state.is_loading() {
                *state = State::Idle;
                self.entry.discard.store(false, Ordering::Release);
            }
        }
    }
}
