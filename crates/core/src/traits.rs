//! Collaborator traits
//!
//! Durability and checkpointing live outside the transactional core. The core
//! reaches them only through these traits, so an embedding application can
//! plug in a file log, a replicated log, or nothing at all.

use crate::error::Result;
use crate::types::Timestamp;

/// Write-ahead log collaborator
///
/// The executor calls `append` with one encoded commit record per committed
/// transaction, in commit-timestamp order, followed by `sync` when the store
/// is configured to sync on commit. Writes are applied to the versioned store
/// only after both succeed. When `sync` fails the executor calls `rollback`,
/// so a commit reported as failed is never found in the log on replay.
///
/// Thread safety: implementations are shared behind an `Arc` and must use
/// interior mutability.
pub trait WriteAheadLog: Send + Sync {
    /// Append one record
    ///
    /// # Errors
    ///
    /// Any error aborts the commit that produced the record.
    fn append(&self, record: &[u8]) -> Result<()>;

    /// Make every appended record durable
    ///
    /// # Errors
    ///
    /// Any error aborts the commit whose record was just appended.
    fn sync(&self) -> Result<()>;

    /// Drop the record written by the most recent `append`
    ///
    /// A no-op when there is nothing to drop.
    fn rollback(&self) -> Result<()>;
}

/// Checkpoint collaborator
///
/// Invoked opportunistically after the oracle garbage-collects conflict
/// records. `end(ts)` reports that every reader with a begin timestamp up to
/// `ts` has finished, so versions older than the newest one at or below `ts`
/// are no longer needed by any live snapshot.
pub trait Checkpointer: Send + Sync {
    /// Begin a checkpoint
    fn start(&self) -> Result<()>;

    /// Finish a checkpoint covering everything up to `ts`
    fn end(&self, ts: Timestamp) -> Result<()>;
}
