//! Wait contexts and cancellation
//!
//! Blocking waits on a watermark can be bounded by a deadline, cut short by a
//! `CancelToken`, or both. A waiter parks on a `Signal`; the watermark
//! releases the signal when the target timestamp is reached and the token
//! pokes it when cancelled, so neither side polls.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use txnkv_core::{Error, Result, Timestamp};

/// One-shot wakeup shared between a waiter and whoever releases it
#[derive(Default)]
pub(crate) struct Signal {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Arc<Signal> {
        Arc::new(Signal::default())
    }

    /// Mark satisfied and wake the waiter
    pub(crate) fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cond.notify_all();
    }

    /// Wake the waiter without satisfying it, so it re-checks its context
    fn poke(&self) {
        let _guard = self.released.lock();
        self.cond.notify_all();
    }

    /// Block until released, cancelled, or past the deadline
    pub(crate) fn wait(&self, ctx: &WaitContext, ts: Timestamp) -> Result<()> {
        let mut released = self.released.lock();
        loop {
            if *released {
                return Ok(());
            }
            if ctx.is_cancelled() {
                return Err(Error::Cancelled { ts });
            }
            match ctx.deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(Error::DeadlineExceeded { ts });
                    }
                    self.cond.wait_until(&mut released, deadline);
                }
                None => self.cond.wait(&mut released),
            }
        }
    }
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    signals: Mutex<Vec<Weak<Signal>>>,
}

/// Cancellation handle shared between a caller and its blocked waits
///
/// Cloning yields another handle to the same token. Cancelling is permanent.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every wait using this token, now and in the future
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let signals = std::mem::take(&mut *self.inner.signals.lock());
        for signal in signals.iter().filter_map(Weak::upgrade) {
            signal.poke();
        }
    }

    /// True once `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Arrange for `signal` to be poked on cancellation
    pub(crate) fn register(&self, signal: &Arc<Signal>) {
        let mut signals = self.inner.signals.lock();
        signals.retain(|s| s.strong_count() > 0);
        signals.push(Arc::downgrade(signal));
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Bounds on a blocking wait
///
/// `WaitContext::background()` waits forever. Deadlines and tokens compose:
/// the wait ends with an error on whichever fires first.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl WaitContext {
    /// Context with no deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_after(timeout)
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now
    ///
    /// A timeout too large to represent leaves the context unbounded.
    pub fn deadline_after(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True if the attached token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelToken::is_cancelled)
    }

    /// Fail fast if the context is already done
    pub fn check(&self, ts: Timestamp) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled { ts });
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded { ts }),
            _ => Ok(()),
        }
    }

    pub(crate) fn register(&self, signal: &Arc<Signal>) {
        if let Some(token) = &self.cancel {
            token.register(signal);
        }
    }
}
