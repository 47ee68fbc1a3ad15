//! Commit executor
//!
//! A single named worker thread is the only writer of the versioned store.
//! Committers hand it `(commit_ts, batch)` pairs and block on a completion
//! until the batch is logged and applied.
//!
//! ## Ordering
//!
//! Timestamps are assigned under the oracle's lock but submitted after it is
//! released, so batches can arrive out of order. The worker holds early
//! arrivals in a reorder buffer and applies strictly in commit-timestamp
//! order: batch `ts` is applied only after every batch below it. Every
//! assigned timestamp is submitted exactly once, so the buffer always drains.
//!
//! ## Per-batch sequence
//!
//! ```text
//! 1. Encode CommitRecord (MessagePack)
//! 2. wal.append(record)
//! 3. wal.sync()            (when sync_wal is set; wal.rollback() on failure)
//! 4. store.apply_batch(ts) (published all at once)
//! 5. signal completion
//! ```
//!
//! A failure in steps 1-3 skips step 4 and completes with the error; the
//! timestamp still counts as processed so later batches are not held up.
//! A record whose sync failed is rolled back so replay never resurrects a
//! commit its caller saw fail.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use txnkv_core::{Error, Result, Timestamp, WriteAheadLog};
use txnkv_durability::CommitRecord;
use txnkv_storage::VersionedStore;

use crate::batch::WriteBatch;
use crate::mailbox::{self, Mailbox, Replier, Reply};

struct Job {
    commit_ts: Timestamp,
    batch: WriteBatch,
    done: Replier<Result<()>>,
}

/// Handle to wait for one submitted batch
#[derive(Debug)]
pub struct Completion {
    commit_ts: Timestamp,
    reply: Reply<Result<()>>,
}

impl Completion {
    /// Commit timestamp of the batch
    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts
    }

    /// Block until the batch has been applied or has failed
    ///
    /// # Errors
    ///
    /// The WAL or encoding error that aborted the batch, or
    /// `Error::StoreStopped` if the executor stopped first.
    pub fn wait(self) -> Result<()> {
        self.reply.recv().unwrap_or(Err(Error::StoreStopped))
    }
}

/// Counters kept by the executor worker
#[derive(Debug, Default)]
struct ExecutorCounters {
    applied: AtomicU64,
    failed: AtomicU64,
}

/// Serializing writer of the versioned store
pub struct Executor {
    mailbox: Arc<Mailbox<Job>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<ExecutorCounters>,
    stopped: AtomicBool,
}

impl Executor {
    /// Start the worker
    ///
    /// `first_ts` is the first commit timestamp the oracle will issue.
    pub fn new(
        store: Arc<VersionedStore>,
        wal: Arc<dyn WriteAheadLog>,
        sync_wal: bool,
        first_ts: Timestamp,
    ) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::new());
        let counters = Arc::new(ExecutorCounters::default());

        let worker = Worker {
            store,
            wal,
            sync_wal,
            next_ts: first_ts,
            pending: BTreeMap::new(),
            counters: Arc::clone(&counters),
        };
        let handle = std::thread::Builder::new()
            .name("txnkv-executor".to_string())
            .spawn({
                let mailbox = Arc::clone(&mailbox);
                move || worker.run(&mailbox)
            })?;

        Ok(Executor {
            mailbox,
            worker: Mutex::new(Some(handle)),
            counters,
            stopped: AtomicBool::new(false),
        })
    }

    /// Queue a batch for application at `commit_ts`
    ///
    /// # Errors
    ///
    /// `Error::StoreStopped` if the executor has been stopped.
    pub fn submit(&self, commit_ts: Timestamp, batch: WriteBatch) -> Result<Completion> {
        let (done, reply) = mailbox::reply();
        let job = Job {
            commit_ts,
            batch,
            done,
        };
        self.mailbox.push(job).map_err(|_| Error::StoreStopped)?;
        Ok(Completion { commit_ts, reply })
    }

    /// Batches applied to the store
    pub fn applied_count(&self) -> u64 {
        self.counters.applied.load(Ordering::Relaxed)
    }

    /// Batches that failed to log
    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Stop the worker after it drains what was already queued; idempotent
    ///
    /// Batches still waiting for an earlier timestamp are dropped and their
    /// completions report `Error::StoreStopped`.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mailbox.close();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!(target: "txnkv::executor", "Executor worker panicked");
            }
        }
    }

    /// True once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("applied", &self.applied_count())
            .field("failed", &self.failed_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct Worker {
    store: Arc<VersionedStore>,
    wal: Arc<dyn WriteAheadLog>,
    sync_wal: bool,
    next_ts: Timestamp,
    pending: BTreeMap<Timestamp, Job>,
    counters: Arc<ExecutorCounters>,
}

impl Worker {
    fn run(mut self, mailbox: &Mailbox<Job>) {
        while let Some(job) = mailbox.pop() {
            self.accept(job);
        }
        tracing::debug!(
            target: "txnkv::executor",
            next_ts = self.next_ts,
            dropped = self.pending.len(),
            "Executor stopped"
        );
    }

    fn accept(&mut self, job: Job) {
        if job.commit_ts < self.next_ts || self.pending.contains_key(&job.commit_ts) {
            let commit_ts = job.commit_ts;
            job.done.send(Err(Error::Corruption(format!(
                "commit timestamp {} submitted twice",
                commit_ts
            ))));
            return;
        }
        self.pending.insert(job.commit_ts, job);

        while let Some(job) = self.pending.remove(&self.next_ts) {
            let result = self.process(&job);
            self.next_ts += 1;
            job.done.send(result);
        }
    }

    fn process(&self, job: &Job) -> Result<()> {
        let commit_ts = job.commit_ts;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.write(job)));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(target: "txnkv::executor", commit_ts, "Batch panicked while logging or applying");
                Err(Error::Wal(format!("commit {} panicked", commit_ts)))
            }
        };

        match &result {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "txnkv::executor", commit_ts, error = %e, "Batch not applied");
            }
        }
        result
    }

    fn write(&self, job: &Job) -> Result<()> {
        let record = CommitRecord::from_mutations(job.commit_ts, job.batch.iter()).encode()?;
        self.wal.append(&record)?;
        if self.sync_wal {
            if let Err(e) = self.wal.sync() {
                if let Err(rollback) = self.wal.rollback() {
                    tracing::error!(
                        target: "txnkv::executor",
                        commit_ts = job.commit_ts,
                        error = %rollback,
                        "Failed to roll back unsynced WAL record"
                    );
                }
                return Err(e);
            }
        }
        let applied = self.store.apply_batch(job.commit_ts, job.batch.iter());
        tracing::trace!(target: "txnkv::executor", commit_ts = job.commit_ts, applied, "Batch applied");
        Ok(())
    }
}
