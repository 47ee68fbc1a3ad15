//! Watermark tracker
//!
//! Answers "has every unit of work up to timestamp T finished?" for one
//! timestamp domain. The oracle owns two of these: one for reads (when may
//! conflict records be collected) and one for commits (when may a new reader
//! take its snapshot).
//!
//! ## Design
//!
//! All state changes go through a mailbox drained by one named worker
//! thread, so the heap and counters need no lock. `done_till` is published
//! through an atomic, which keeps `done_till()` and the `wait_until` fast path
//! off the worker entirely.
//!
//! ```text
//! begin(ts) / finish(ts) ──► [mailbox] ──► worker: MarkState::apply
//!                                             │
//!                                             ├─► done_till (AtomicU64)
//!                                             └─► release waiters ≤ done_till
//! ```

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use txnkv_core::{Result, Timestamp};

use crate::context::{Signal, WaitContext};
use crate::mailbox::Mailbox;

/// Pending-count bookkeeping behind a watermark
///
/// Pure state machine with no threads or queues. `done_till` is the largest
/// timestamp such that every begun timestamp at or below it has drained to a
/// zero pending count.
#[derive(Debug, Clone, Default)]
pub struct MarkState {
    done_till: Timestamp,
    heap: BinaryHeap<Reverse<Timestamp>>,
    pending: HashMap<Timestamp, i64>,
}

impl MarkState {
    /// State with `done_till` starting at `initial`
    pub fn new(initial: Timestamp) -> Self {
        MarkState {
            done_till: initial,
            ..Default::default()
        }
    }

    /// Current done-till value
    pub fn done_till(&self) -> Timestamp {
        self.done_till
    }

    /// Record one more pending unit at `ts`
    ///
    /// Returns the new done-till if it advanced.
    pub fn begin(&mut self, ts: Timestamp) -> Option<Timestamp> {
        self.apply(ts, 1)
    }

    /// Record one pending unit at `ts` as finished
    ///
    /// Returns the new done-till if it advanced.
    pub fn finish(&mut self, ts: Timestamp) -> Option<Timestamp> {
        self.apply(ts, -1)
    }

    /// Lowest timestamp still in the heap
    pub fn lowest_pending(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(ts)| *ts)
    }

    /// Number of distinct timestamps in flight
    pub fn in_flight(&self) -> usize {
        self.heap.len()
    }

    fn apply(&mut self, ts: Timestamp, delta: i64) -> Option<Timestamp> {
        if !self.pending.contains_key(&ts) {
            self.heap.push(Reverse(ts));
        }
        *self.pending.entry(ts).or_insert(0) += delta;

        let before = self.done_till;
        let mut until = before;
        while let Some(Reverse(min)) = self.heap.peek().copied() {
            // A Finish can arrive before its Begin; a negative count is still in flight
            if self.pending.get(&min).copied().unwrap_or(0) != 0 {
                break;
            }
            self.heap.pop();
            self.pending.remove(&min);
            until = until.max(min);
        }

        if until != before {
            self.done_till = until;
            Some(until)
        } else {
            None
        }
    }
}

enum Mark {
    Begin(Timestamp),
    Finish(Timestamp),
    Wait(Timestamp, Arc<Signal>),
    Barrier(Arc<Signal>),
}

struct Shared {
    name: String,
    done_till: AtomicU64,
}

/// Watermark actor for one timestamp domain
///
/// `begin` and `finish` never block. `wait_until` blocks the caller until
/// done-till reaches the target, its context gives up, or the watermark is
/// stopped (stopping releases every waiter as satisfied).
pub struct WaterMark {
    shared: Arc<Shared>,
    mailbox: Arc<Mailbox<Mark>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WaterMark {
    /// Start a watermark whose done-till begins at `initial`
    ///
    /// The worker thread is named `txnkv-mark-{name}`.
    pub fn new(name: &str, initial: Timestamp) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            done_till: AtomicU64::new(initial),
        });
        let mailbox = Arc::new(Mailbox::new());

        let worker_shared = Arc::clone(&shared);
        let worker_mailbox = Arc::clone(&mailbox);
        let handle = std::thread::Builder::new()
            .name(format!("txnkv-mark-{}", name))
            .spawn(move || run(worker_shared, &worker_mailbox, initial))?;

        Ok(WaterMark {
            shared,
            mailbox,
            worker: Mutex::new(Some(handle)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Record one more pending unit at `ts`
    pub fn begin(&self, ts: Timestamp) {
        self.send(Mark::Begin(ts));
    }

    /// Record one pending unit at `ts` as finished
    pub fn finish(&self, ts: Timestamp) {
        self.send(Mark::Finish(ts));
    }

    /// Current done-till; never blocks
    pub fn done_till(&self) -> Timestamp {
        self.shared.done_till.load(Ordering::SeqCst)
    }

    /// Block until done-till ≥ `ts`
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` or `Error::DeadlineExceeded` when `ctx` gives up first.
    pub fn wait_until(&self, ts: Timestamp, ctx: &WaitContext) -> Result<()> {
        if self.done_till() >= ts {
            return Ok(());
        }
        ctx.check(ts)?;

        let signal = Signal::new();
        ctx.register(&signal);
        if !self.send(Mark::Wait(ts, Arc::clone(&signal))) {
            // Stopped watermarks satisfy every wait
            return Ok(());
        }
        signal.wait(ctx, ts)
    }

    /// Block until every event sent before this call has been processed
    pub fn barrier(&self) {
        let signal = Signal::new();
        if self.send(Mark::Barrier(Arc::clone(&signal))) {
            let _ = signal.wait(&WaitContext::background(), 0);
        }
    }

    /// Stop the worker, releasing every waiter; idempotent
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mailbox.close();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!(target: "txnkv::watermark", name = %self.shared.name, "Watermark worker panicked");
            }
        }
    }

    /// True once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn send(&self, mark: Mark) -> bool {
        self.mailbox.push(mark).is_ok()
    }
}

impl Drop for WaterMark {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WaterMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterMark")
            .field("name", &self.shared.name)
            .field("done_till", &self.done_till())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn run(shared: Arc<Shared>, mailbox: &Mailbox<Mark>, initial: Timestamp) {
    let mut state = MarkState::new(initial);
    let mut waiters: BTreeMap<Timestamp, Vec<Arc<Signal>>> = BTreeMap::new();

    while let Some(mark) = mailbox.pop() {
        let advanced = match mark {
            Mark::Begin(ts) => state.begin(ts),
            Mark::Finish(ts) => state.finish(ts),
            Mark::Wait(ts, signal) => {
                if state.done_till() >= ts {
                    signal.release();
                } else {
                    waiters.entry(ts).or_default().push(signal);
                }
                None
            }
            Mark::Barrier(signal) => {
                signal.release();
                None
            }
        };

        if let Some(done_till) = advanced {
            shared.done_till.store(done_till, Ordering::SeqCst);
            let pending = waiters.split_off(&(done_till + 1));
            for signal in std::mem::replace(&mut waiters, pending)
                .into_values()
                .flatten()
            {
                signal.release();
            }
            tracing::trace!(target: "txnkv::watermark", name = %shared.name, done_till, "Watermark advanced");
        }
    }

    let released: usize = waiters.values().map(Vec::len).sum();
    for signal in waiters.into_values().flatten() {
        signal.release();
    }
    tracing::debug!(
        target: "txnkv::watermark",
        name = %shared.name,
        done_till = state.done_till(),
        released,
        "Watermark stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;
    use txnkv_core::Error;

    static_assertions::assert_impl_all!(WaterMark: Send, Sync);

    // ========================================================================
    // MarkState
    // ========================================================================

    #[test]
    fn test_state_advances_in_order() {
        let mut state = MarkState::new(0);
        assert_eq!(state.begin(1), None);
        assert_eq!(state.begin(2), None);
        assert_eq!(state.begin(3), None);

        // Finishing out of order holds done-till at the lowest unfinished
        assert_eq!(state.finish(2), None);
        assert_eq!(state.done_till(), 0);
        assert_eq!(state.finish(1), Some(2));
        assert_eq!(state.finish(3), Some(3));
        assert_eq!(state.in_flight(), 0);
    }

    #[test]
    fn test_state_counts_multiple_units_per_ts() {
        let mut state = MarkState::new(0);
        state.begin(4);
        state.begin(4);
        assert_eq!(state.finish(4), None);
        assert_eq!(state.lowest_pending(), Some(4));
        assert_eq!(state.finish(4), Some(4));
    }

    #[test]
    fn test_state_finish_before_begin() {
        let mut state = MarkState::new(0);
        assert_eq!(state.finish(1), None);
        assert_eq!(state.begin(1), Some(1));
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let mut state = MarkState::new(10);
        state.begin(5);
        assert_eq!(state.finish(5), None);
        assert_eq!(state.done_till(), 10);
    }

    proptest! {
        #[test]
        fn prop_done_till_monotonic_and_below_in_flight(
            steps in proptest::collection::vec((1u64..4, any::<bool>()), 1..60)
        ) {
            let mut state = MarkState::new(0);
            let mut next = 1u64;
            let mut open: Vec<Timestamp> = Vec::new();
            let mut last = state.done_till();

            for (gap, finish_first) in steps {
                if finish_first && !open.is_empty() {
                    // Finish an arbitrary open timestamp
                    let idx = (gap as usize) % open.len();
                    let ts = open.remove(idx);
                    state.finish(ts);
                } else {
                    state.begin(next);
                    open.push(next);
                    next += gap;
                }

                let done = state.done_till();
                prop_assert!(done >= last);
                if let Some(min_open) = open.iter().min() {
                    prop_assert!(done < *min_open);
                }
                last = done;
            }

            for ts in open.drain(..) {
                state.finish(ts);
            }
            prop_assert_eq!(state.in_flight(), 0);
        }
    }

    // ========================================================================
    // WaterMark actor
    // ========================================================================

    #[test]
    fn test_wait_fast_path() {
        let mark = WaterMark::new("fast", 5).unwrap();
        mark.wait_until(5, &WaitContext::background()).unwrap();
        mark.wait_until(0, &WaitContext::background()).unwrap();
    }

    #[test]
    fn test_wait_released_by_finish() {
        let mark = Arc::new(WaterMark::new("commit", 0).unwrap());
        mark.begin(1);
        mark.begin(2);

        let waiter = {
            let mark = Arc::clone(&mark);
            thread::spawn(move || mark.wait_until(2, &WaitContext::background()))
        };

        mark.finish(2);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        assert_eq!(mark.done_till(), 0);

        mark.finish(1);
        waiter.join().unwrap().unwrap();
        assert_eq!(mark.done_till(), 2);
    }

    #[test]
    fn test_barrier_observes_prior_events() {
        let mark = WaterMark::new("barrier", 0).unwrap();
        mark.begin(1);
        mark.finish(1);
        mark.barrier();
        assert_eq!(mark.done_till(), 1);
    }

    #[test]
    fn test_wait_deadline() {
        let mark = WaterMark::new("deadline", 0).unwrap();
        mark.begin(1);
        let err = mark
            .wait_until(1, &WaitContext::with_timeout(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { ts: 1 }));
    }

    #[test]
    fn test_wait_cancelled() {
        let mark = Arc::new(WaterMark::new("cancel", 0).unwrap());
        mark.begin(1);
        let token = crate::CancelToken::new();
        let ctx = WaitContext::background().with_cancel(token.clone());

        let waiter = {
            let mark = Arc::clone(&mark);
            thread::spawn(move || mark.wait_until(1, &ctx))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled { ts: 1 }));
    }

    #[test]
    fn test_stop_releases_waiters() {
        let mark = Arc::new(WaterMark::new("stop", 0).unwrap());
        mark.begin(1);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let mark = Arc::clone(&mark);
                thread::spawn(move || mark.wait_until(1, &WaitContext::background()))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));

        mark.stop();
        mark.stop();
        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }

        // Waits after stop are satisfied too
        mark.wait_until(100, &WaitContext::background()).unwrap();
        assert!(mark.is_stopped());
    }

    #[test]
    fn test_concurrent_begin_finish() {
        let mark = Arc::new(WaterMark::new("concurrent", 0).unwrap());
        for ts in 1..=400u64 {
            mark.begin(ts);
        }

        let finishers: Vec<_> = (0..4u64)
            .map(|offset| {
                let mark = Arc::clone(&mark);
                thread::spawn(move || {
                    let mut ts = 1 + offset;
                    while ts <= 400 {
                        mark.finish(ts);
                        ts += 4;
                    }
                })
            })
            .collect();
        for f in finishers {
            f.join().unwrap();
        }

        mark.wait_until(400, &WaitContext::background()).unwrap();
        assert_eq!(mark.done_till(), 400);
    }
}
