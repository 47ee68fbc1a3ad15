//! Transaction coordinator
//!
//! Owns the shared machinery every transaction is bound to: the oracle, the
//! executor, and the versioned store. It also keeps the transaction metrics.
//!
//! # Memory Ordering
//!
//! The metric counters use Relaxed ordering. They are purely observational,
//! synchronize nothing else, and approximate counts are acceptable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use txnkv_core::{Checkpointer, Error, Result, WriteAheadLog};
use txnkv_storage::VersionedStore;

use crate::context::WaitContext;
use crate::executor::Executor;
use crate::oracle::{Oracle, OracleStats};
use crate::transaction::Transaction;

/// Metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Transactions begun
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Failed commits plus update transactions discarded without committing
    pub aborted: u64,
    /// Commits rejected with a conflict (included in `aborted`)
    pub conflicts: u64,
    /// Transactions neither committed nor discarded yet
    pub active: u64,
    /// `(key, version)` entries in the store
    pub stored_versions: usize,
    /// Oracle bookkeeping
    pub oracle: OracleStats,
}

#[derive(Debug, Default)]
struct TransactionMetrics {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
    active: AtomicU64,
}

/// Shared state behind every transaction of one store
pub struct Coordinator {
    oracle: Oracle,
    executor: Executor,
    store: Arc<VersionedStore>,
    metrics: TransactionMetrics,
    stopped: AtomicBool,
}

impl Coordinator {
    /// Start an empty store with its oracle and executor
    pub fn new(
        wal: Arc<dyn WriteAheadLog>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        sync_wal: bool,
    ) -> Result<Self> {
        let store = Arc::new(VersionedStore::new());
        let oracle = match checkpointer {
            Some(checkpointer) => Oracle::with_checkpointer(checkpointer)?,
            None => Oracle::new()?,
        };
        let first_ts = oracle.stats().next_commit_ts;
        let executor = Executor::new(Arc::clone(&store), wal, sync_wal, first_ts)?;

        Ok(Coordinator {
            oracle,
            executor,
            store,
            metrics: TransactionMetrics::default(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Begin a transaction
    ///
    /// Blocks until every commit at or below the new begin timestamp is
    /// visible, bounded by `ctx`.
    ///
    /// # Errors
    ///
    /// - `Error::StoreStopped` if the store is stopped
    /// - `Error::Cancelled` / `Error::DeadlineExceeded` from `ctx`
    pub fn begin(self: &Arc<Self>, update: bool, ctx: &WaitContext) -> Result<Transaction> {
        if self.is_stopped() {
            return Err(Error::StoreStopped);
        }
        let read_ts = self.oracle.new_read_ts(ctx)?;
        if self.is_stopped() {
            // Stopping releases blocked readers; they must not proceed
            self.oracle.discard_read(read_ts);
            return Err(Error::StoreStopped);
        }

        let snapshot = self.store.snapshot(read_ts);
        self.metrics.started.fetch_add(1, Ordering::Relaxed);
        self.metrics.active.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "txnkv::txn", read_ts, update, "Transaction started");

        Ok(Transaction::new(Arc::clone(self), read_ts, snapshot, update))
    }

    /// Stop the executor and both watermarks; idempotent
    ///
    /// Batches already queued are applied first. Blocked readers are released
    /// and fail with `Error::StoreStopped`.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.executor.stop();
        self.oracle.stop();
        tracing::debug!(
            target: "txnkv::txn",
            committed = self.metrics.committed.load(Ordering::Relaxed),
            "Coordinator stopped"
        );
    }

    /// True once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The timestamp oracle
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// The commit executor
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The versioned store
    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Metrics snapshot
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            started: self.metrics.started.load(Ordering::Relaxed),
            committed: self.metrics.committed.load(Ordering::Relaxed),
            aborted: self.metrics.aborted.load(Ordering::Relaxed),
            conflicts: self.metrics.conflicts.load(Ordering::Relaxed),
            active: self.metrics.active.load(Ordering::Relaxed),
            stored_versions: self.store.len(),
            oracle: self.oracle.stats(),
        }
    }

    pub(crate) fn record_committed(&self) {
        self.metrics.committed.fetch_add(1, Ordering::Relaxed);
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self, conflict: bool) {
        self.metrics.aborted.fetch_add(1, Ordering::Relaxed);
        if conflict {
            self.metrics.conflicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_finished(&self) {
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("stats", &self.stats())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
