//! Cancellation tokens and the listener connection latch
//!
//! Tokens are cheap clones sharing one flag. A token may carry a deadline and
//! a parent; it reads as cancelled once it was cancelled directly, its
//! deadline passed, or its parent is cancelled. Waiters poll in short slices
//! so linked parents and deadlines are noticed without extra threads.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Poll slice used while waiting on a token or latch
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Why a token reads as cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called (Ctrl-C, caller shutdown)
    Requested,
    /// The token's own deadline passed
    TimedOut,
    /// A parent token was cancelled
    Parent,
}

#[derive(Debug)]
struct TokenInner {
    cancelled: Mutex<bool>,
    cond: Condvar,
    deadline: Option<Instant>,
    parent: Option<CancellationToken>,
}

/// Shared cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Token that cancels itself after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), None)
    }

    /// Child of `parent` that additionally cancels after `timeout`.
    pub fn linked(parent: &CancellationToken, timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), Some(parent.clone()))
    }

    /// Child of `parent` with no deadline of its own.
    pub fn child(parent: &CancellationToken) -> Self {
        Self::build(None, Some(parent.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<CancellationToken>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: Mutex::new(false),
                cond: Condvar::new(),
                deadline,
                parent,
            }),
        }
    }

    /// Cancel this token and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if let Ok(mut cancelled) = self.inner.cancelled.lock() {
            *cancelled = true;
        }
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// First cause that applies, checking direct cancellation before the
    /// deadline and the deadline before the parent.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.inner.cancelled.lock().map(|c| *c).unwrap_or(true) {
            return Some(CancelReason::Requested);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(CancelReason::TimedOut);
            }
        }
        match self.inner.parent {
            Some(ref parent) if parent.is_cancelled() => Some(CancelReason::Parent),
            _ => None,
        }
    }

    /// Block until cancelled or `timeout` elapses. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.is_cancelled() {
                return true;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return false;
            }
            let slice = (timeout - elapsed).min(WAIT_SLICE);
            let guard = match self.inner.cancelled.lock() {
                Ok(guard) => guard,
                Err(_) => return true,
            };
            if *guard {
                return true;
            }
            let _ = self.inner.cond.wait_timeout(guard, slice);
        }
    }

    /// Time until this token's own deadline, if it has one.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Outcome of waiting for the app to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Connected,
    /// The listener stopped before anything connected
    Abandoned,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Pending,
    Connected,
    Abandoned,
}

/// One-shot latch set by a listener when the app first connects.
///
/// The first transition out of pending wins; later calls are ignored.
#[derive(Debug, Clone)]
pub struct ConnectionSignal {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl Default for ConnectionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(LatchState::Pending), Condvar::new())),
        }
    }

    pub fn mark_connected(&self) {
        self.settle(LatchState::Connected);
    }

    pub fn abandon(&self) {
        self.settle(LatchState::Abandoned);
    }

    fn settle(&self, to: LatchState) {
        let (lock, cond) = &*self.inner;
        if let Ok(mut state) = lock.lock() {
            if *state == LatchState::Pending {
                *state = to;
            }
        }
        cond.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LatchState::Connected
    }

    fn state(&self) -> LatchState {
        self.inner
            .0
            .lock()
            .map(|s| *s)
            .unwrap_or(LatchState::Abandoned)
    }

    /// Wait for a connection, giving up after `timeout` or once `cancel` fires.
    pub fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> ConnectionOutcome {
        let (lock, cond) = &*self.inner;
        let started = Instant::now();
        loop {
            match self.state() {
                LatchState::Connected => return ConnectionOutcome::Connected,
                LatchState::Abandoned => return ConnectionOutcome::Abandoned,
                LatchState::Pending => {}
            }
            if cancel.is_cancelled() {
                return ConnectionOutcome::Abandoned;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return ConnectionOutcome::TimedOut;
            }
            let slice = (timeout - elapsed).min(WAIT_SLICE);
            match lock.lock() {
                Ok(guard) if *guard == LatchState::Pending => {
                    let _ = cond.wait_timeout(guard, slice);
                }
                Ok(_) => {}
                Err(_) => return ConnectionOutcome::Abandoned,
            }
        }
    }
}
