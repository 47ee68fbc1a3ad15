//! Transaction
//!
//! The unit of work. An update transaction buffers writes in a `WriteBatch`
//! and records in a `ReadSet` every key and prefix it reads from its
//! snapshot; a read-only transaction does neither.
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──commit ok──► Committed(commit_ts)
//!    │
//!    ├──commit failed──► Discarded
//!    └──discard/drop───► Discarded
//! ```
//!
//! The read timestamp is released on the read watermark exactly once: by a
//! successful `new_commit_ts`, or by `discard`. Dropping a transaction
//! discards it, including while unwinding from a panic.
//!
//! A transaction is driven by one caller at a time; it has no internal
//! synchronization.

use std::collections::BTreeMap;
use std::sync::Arc;
use txnkv_core::{Error, Key, Mutation, Result, Timestamp, Value};
use txnkv_storage::Snapshot;

use crate::batch::{ReadSet, WriteBatch};
use crate::coordinator::Coordinator;
use crate::executor::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed(Timestamp),
    Discarded,
}

/// A snapshot-isolated transaction
pub struct Transaction {
    coordinator: Arc<Coordinator>,
    read_ts: Timestamp,
    snapshot: Snapshot,
    writes: WriteBatch,
    reads: ReadSet,
    update: bool,
    state: TxnState,
    read_done: bool,
}

impl Transaction {
    pub(crate) fn new(
        coordinator: Arc<Coordinator>,
        read_ts: Timestamp,
        snapshot: Snapshot,
        update: bool,
    ) -> Self {
        Transaction {
            coordinator,
            read_ts,
            snapshot,
            writes: WriteBatch::new(),
            reads: ReadSet::new(),
            update,
            state: TxnState::Active,
            read_done: false,
        }
    }

    /// Begin timestamp; reads see commits at or below it
    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Commit timestamp once committed
    pub fn commit_ts(&self) -> Option<Timestamp> {
        match self.state {
            TxnState::Committed(ts) => Some(ts),
            _ => None,
        }
    }

    /// True for a read-write transaction
    pub fn is_update(&self) -> bool {
        self.update
    }

    /// True until committed or discarded
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Keys and prefixes read from the snapshot
    pub fn read_set(&self) -> &ReadSet {
        &self.reads
    }

    /// Buffered writes
    pub fn pending_writes(&self) -> &WriteBatch {
        &self.writes
    }

    /// Read a key
    ///
    /// An update transaction sees its own buffered write first; otherwise the
    /// key is added to the read set and read from the snapshot. A tombstone
    /// reads as `None`.
    pub fn get(&mut self, key: impl Into<Key>) -> Result<Option<Value>> {
        self.ensure_active()?;
        let key = key.into();
        if self.update {
            if let Some(mutation) = self.writes.get(&key) {
                return Ok(mutation.value().cloned());
            }
            self.reads.add_key(key.clone());
        }
        Ok(self.snapshot.get(&key))
    }

    /// Buffer a write
    ///
    /// # Errors
    ///
    /// - `Error::ReadOnlyTransaction` on a read-only transaction
    /// - `Error::EmptyKey` for a zero-length key
    /// - `Error::DuplicateKey` if the key was already written here
    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.write(key.into(), Mutation::Put(value.into()))
    }

    /// Buffer a delete; same rules as [`set`](Self::set)
    pub fn delete(&mut self, key: impl Into<Key>) -> Result<()> {
        self.write(key.into(), Mutation::Delete)
    }

    /// Live keys starting with `prefix`, in key order
    ///
    /// Buffered writes override the snapshot. An update transaction adds the
    /// prefix itself to its read set, so a concurrent commit that inserts,
    /// changes, or deletes any key under it is a conflict.
    pub fn scan_prefix(&mut self, prefix: impl AsRef<[u8]>) -> Result<Vec<(Key, Value)>> {
        self.ensure_active()?;
        let prefix = prefix.as_ref();

        let mut merged: BTreeMap<Key, Value> = BTreeMap::new();
        for (key, value) in self.snapshot.scan_prefix(prefix) {
            if self.update && self.writes.contains(&key) {
                continue;
            }
            merged.insert(key, value);
        }
        if self.update {
            self.reads.add_prefix(prefix);
        }

        if self.update {
            for (key, mutation) in self.writes.iter() {
                if !key.starts_with(prefix) {
                    continue;
                }
                if let Mutation::Put(value) = mutation {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Commit buffered writes
    ///
    /// Returns the commit timestamp. Blocks until the writes are applied and
    /// visible to transactions that begin afterwards.
    ///
    /// # Errors
    ///
    /// - `Error::EmptyTransaction` if nothing was written; the transaction
    ///   stays active and no timestamp is consumed
    /// - `Error::Conflict` if a concurrent commit wrote a key this transaction
    ///   read or a key under a prefix it scanned
    /// - `Error::Wal` if logging failed; nothing was applied and the commit
    ///   timestamp stays consumed
    /// - `Error::StoreStopped` if the store stopped
    ///
    /// Except for `EmptyTransaction`, a failed commit discards the transaction.
    pub fn commit(&mut self) -> Result<Timestamp> {
        self.ensure_active()?;
        if self.writes.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        if self.coordinator.is_stopped() {
            self.discard();
            return Err(Error::StoreStopped);
        }

        let coordinator = Arc::clone(&self.coordinator);
        let oracle = coordinator.oracle();

        let commit_ts = match oracle.new_commit_ts(self.read_ts, &self.reads, &self.writes) {
            Ok(ts) => ts,
            Err(e) => {
                coordinator.record_aborted(e.is_conflict());
                tracing::warn!(target: "txnkv::txn", read_ts = self.read_ts, error = %e, "Commit rejected");
                self.writes = WriteBatch::new();
                self.discard();
                return Err(e);
            }
        };
        self.read_done = true;

        let batch = std::mem::take(&mut self.writes);
        let result = coordinator
            .executor()
            .submit(commit_ts, batch)
            .and_then(Completion::wait);

        match result {
            Ok(()) => {
                oracle.done_commit(commit_ts);
                self.state = TxnState::Committed(commit_ts);
                coordinator.record_committed();
                tracing::debug!(target: "txnkv::txn", read_ts = self.read_ts, commit_ts, "Transaction committed");
                Ok(commit_ts)
            }
            Err(e) => {
                oracle.abandon_commit(commit_ts);
                coordinator.record_aborted(false);
                self.state = TxnState::Discarded;
                coordinator.record_finished();
                tracing::warn!(target: "txnkv::txn", commit_ts, error = %e, "Commit aborted after timestamp assignment");
                Err(e)
            }
        }
    }

    /// Abandon the transaction; idempotent
    ///
    /// Releases the read timestamp if still held. Calling this after a
    /// successful commit does nothing.
    pub fn discard(&mut self) {
        if !self.read_done {
            self.coordinator.oracle().discard_read(self.read_ts);
            self.read_done = true;
        }
        if self.state == TxnState::Active {
            self.state = TxnState::Discarded;
            if self.update && !self.writes.is_empty() {
                self.coordinator.record_aborted(false);
            }
            self.coordinator.record_finished();
            tracing::debug!(target: "txnkv::txn", read_ts = self.read_ts, "Transaction discarded");
        }
    }

    fn write(&mut self, key: Key, mutation: Mutation) -> Result<()> {
        self.ensure_active()?;
        if !self.update {
            return Err(Error::ReadOnlyTransaction);
        }
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.writes.insert(key, mutation)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            _ => Err(Error::TransactionFinished),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("read_ts", &self.read_ts)
            .field("update", &self.update)
            .field("state", &self.state)
            .field("reads", &(self.reads.keys().len() + self.reads.prefixes().len()))
            .field("writes", &self.writes.len())
            .finish()
    }
}
