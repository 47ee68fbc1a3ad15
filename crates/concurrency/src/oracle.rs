//! Timestamp oracle
//!
//! The oracle is the single authority for timestamps and the single point
//! where commits are checked for conflicts.
//!
//! ## Timestamps
//!
//! Begin and commit timestamps come from one counter, `next_ts`, starting at 1.
//! A reader begins at `next_ts - 1`, the last commit timestamp handed out. A
//! committer takes `next_ts` and advances it by one.
//!
//! ## Conflict detection
//!
//! Every successful commit leaves a ready-to-commit record holding its write
//! keys. A later committer that began at `read_ts` conflicts if any record with
//! `commit_ts > read_ts` wrote a key it read, or a key under a prefix it
//! scanned. Records at or below the read
//! watermark's done-till can no longer conflict with any live reader and are
//! collected.
//!
//! ## Visibility
//!
//! A commit timestamp is begun on the commit watermark when assigned and
//! finished once its writes are in the store (or the commit is abandoned).
//! `new_read_ts` waits for the commit watermark to reach the new begin
//! timestamp, so a snapshot never misses a commit at or below it.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use txnkv_core::{Checkpointer, Error, Key, Result, Timestamp};

use crate::batch::{ReadSet, WriteBatch};
use crate::context::WaitContext;
use crate::watermark::WaterMark;

/// Ready-to-commit record: one committed transaction's write keys
#[derive(Debug)]
struct CommittedTxn {
    ts: Timestamp,
    conflict_keys: HashSet<Key>,
}

#[derive(Debug)]
struct OracleState {
    next_ts: Timestamp,
    /// Ascending by `ts`
    committed: Vec<CommittedTxn>,
    last_checkpoint: Timestamp,
}

/// Point-in-time view of oracle bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleStats {
    /// Begin timestamp the next reader would get
    pub read_ts: Timestamp,
    /// Commit timestamp the next committer would get
    pub next_commit_ts: Timestamp,
    /// Done-till of the read watermark
    pub read_done_till: Timestamp,
    /// Done-till of the commit watermark
    pub commit_done_till: Timestamp,
    /// Ready-to-commit records still retained for conflict checks
    pub retained_commits: usize,
}

/// Timestamp issuer and conflict detector
pub struct Oracle {
    state: Mutex<OracleState>,
    read_mark: WaterMark,
    commit_mark: WaterMark,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl Oracle {
    /// Create an oracle with no checkpoint hook
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Create an oracle that reports collectable history to `checkpointer`
    pub fn with_checkpointer(checkpointer: Arc<dyn Checkpointer>) -> Result<Self> {
        Self::build(Some(checkpointer))
    }

    fn build(checkpointer: Option<Arc<dyn Checkpointer>>) -> Result<Self> {
        Ok(Oracle {
            state: Mutex::new(OracleState {
                next_ts: 1,
                committed: Vec::new(),
                last_checkpoint: 0,
            }),
            read_mark: WaterMark::new("read", 0)?,
            commit_mark: WaterMark::new("commit", 0)?,
            checkpointer,
        })
    }

    /// Issue a begin timestamp
    ///
    /// Blocks until every commit at or below the returned timestamp is
    /// visible in the store.
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` / `Error::DeadlineExceeded` if `ctx` gives up while
    /// waiting. The read is released before returning, so nothing leaks.
    pub fn new_read_ts(&self, ctx: &WaitContext) -> Result<Timestamp> {
        let read_ts = {
            let state = self.state.lock();
            let read_ts = state.next_ts - 1;
            self.read_mark.begin(read_ts);
            read_ts
        };

        if let Err(e) = self.commit_mark.wait_until(read_ts, ctx) {
            self.read_mark.finish(read_ts);
            tracing::debug!(target: "txnkv::oracle", read_ts, error = %e, "Read timestamp wait abandoned");
            return Err(e);
        }
        Ok(read_ts)
    }

    /// Conflict-check a transaction and issue its commit timestamp
    ///
    /// On success the transaction's read has been finished on the read
    /// watermark; the caller must not call `discard_read` for it again. On
    /// failure nothing changed and the read is still open.
    ///
    /// # Errors
    ///
    /// - `Error::EmptyTransaction` if `writes` is empty
    /// - `Error::Conflict` if a commit after `read_ts` wrote a key covered by `reads`
    pub fn new_commit_ts(
        &self,
        read_ts: Timestamp,
        reads: &ReadSet,
        writes: &WriteBatch,
    ) -> Result<Timestamp> {
        if writes.is_empty() {
            return Err(Error::EmptyTransaction);
        }

        let (commit_ts, checkpoint) = {
            let mut state = self.state.lock();

            let conflicted = state
                .committed
                .iter()
                .rev()
                .take_while(|c| c.ts > read_ts)
                .any(|c| reads.overlaps(&c.conflict_keys));
            if conflicted {
                tracing::debug!(target: "txnkv::oracle", read_ts, "Commit conflict detected");
                return Err(Error::Conflict);
            }

            self.read_mark.finish(read_ts);

            let done_till = self.read_mark.done_till();
            let collectable = state.committed.partition_point(|c| c.ts <= done_till);
            state.committed.drain(..collectable);

            let checkpoint = match &self.checkpointer {
                Some(_) if done_till > state.last_checkpoint => {
                    state.last_checkpoint = done_till;
                    Some(done_till)
                }
                _ => None,
            };

            let commit_ts = state.next_ts;
            state.next_ts += 1;
            state.committed.push(CommittedTxn {
                ts: commit_ts,
                conflict_keys: writes.keys().cloned().collect(),
            });
            self.commit_mark.begin(commit_ts);

            (commit_ts, checkpoint)
        };

        tracing::debug!(target: "txnkv::oracle", read_ts, commit_ts, "Commit timestamp issued");

        if let Some(ts) = checkpoint {
            self.run_checkpoint(ts);
        }
        Ok(commit_ts)
    }

    /// Mark a commit visible: its writes are in the store
    pub fn done_commit(&self, commit_ts: Timestamp) {
        self.commit_mark.finish(commit_ts);
    }

    /// Release a transaction's read without committing
    ///
    /// Must be called at most once per read timestamp, and never after a
    /// successful `new_commit_ts` for the same transaction.
    pub fn discard_read(&self, read_ts: Timestamp) {
        self.read_mark.finish(read_ts);
    }

    /// Withdraw a commit whose writes will never be applied
    ///
    /// The timestamp stays consumed. Its ready-to-commit record is removed so
    /// it cannot fail other transactions, and the commit watermark is released
    /// so readers do not wait on it forever.
    pub fn abandon_commit(&self, commit_ts: Timestamp) {
        {
            let mut state = self.state.lock();
            if let Ok(pos) = state.committed.binary_search_by_key(&commit_ts, |c| c.ts) {
                state.committed.remove(pos);
            }
        }
        self.commit_mark.finish(commit_ts);
        tracing::debug!(target: "txnkv::oracle", commit_ts, "Commit abandoned");
    }

    /// Begin timestamp the next reader would get
    pub fn read_ts(&self) -> Timestamp {
        self.state.lock().next_ts - 1
    }

    /// Watermark tracking open reads
    pub fn read_mark(&self) -> &WaterMark {
        &self.read_mark
    }

    /// Watermark tracking in-flight commits
    pub fn commit_mark(&self) -> &WaterMark {
        &self.commit_mark
    }

    /// Snapshot of counters and watermarks
    pub fn stats(&self) -> OracleStats {
        let state = self.state.lock();
        OracleStats {
            read_ts: state.next_ts - 1,
            next_commit_ts: state.next_ts,
            read_done_till: self.read_mark.done_till(),
            commit_done_till: self.commit_mark.done_till(),
            retained_commits: state.committed.len(),
        }
    }

    /// Stop both watermarks, releasing every waiter
    pub fn stop(&self) {
        self.read_mark.stop();
        self.commit_mark.stop();
    }

    fn run_checkpoint(&self, ts: Timestamp) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        let result = checkpointer.start().and_then(|()| checkpointer.end(ts));
        match result {
            Ok(()) => tracing::debug!(target: "txnkv::oracle", ts, "Checkpoint completed"),
            Err(e) => tracing::warn!(target: "txnkv::oracle", ts, error = %e, "Checkpoint failed"),
        }
    }
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle").field("stats", &self.stats()).finish()
    }
}
