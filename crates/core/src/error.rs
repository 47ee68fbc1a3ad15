//! Error types for txnkv
//!
//! A single error enum covers every layer. Variants fall into four groups:
//! - Conflict: serialization failure, safe to retry from a fresh begin timestamp
//! - Usage: caller mistakes that consume no timestamp
//! - Lifecycle: the store has been stopped
//! - Collaborator: write-ahead log, checkpoint, and I/O failures
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{Key, Timestamp};
use std::io;
use thiserror::Error;

/// Result type alias for txnkv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for txnkv
#[derive(Debug, Error)]
pub enum Error {
    /// A transaction committed after our begin timestamp wrote a key we read
    #[error("Transaction conflict: a concurrent commit wrote a key this transaction read")]
    Conflict,

    /// Write attempted through a read-only transaction
    #[error("Transaction is read-only")]
    ReadOnlyTransaction,

    /// Zero-length key passed to a write
    #[error("Key is empty")]
    EmptyKey,

    /// The key was already written in this transaction
    #[error("Key {0:?} already written in this transaction")]
    DuplicateKey(Key),

    /// Commit requested with nothing buffered
    #[error("Transaction has no writes to commit")]
    EmptyTransaction,

    /// The transaction was already committed or discarded
    #[error("Transaction already finished")]
    TransactionFinished,

    /// The store was stopped
    #[error("Store is stopped")]
    StoreStopped,

    /// The wait for a timestamp was cancelled through its cancel token
    #[error("Wait for timestamp {ts} was cancelled")]
    Cancelled {
        /// Timestamp being waited for
        ts: Timestamp,
    },

    /// The wait for a timestamp ran past its deadline
    #[error("Wait for timestamp {ts} exceeded its deadline")]
    DeadlineExceeded {
        /// Timestamp being waited for
        ts: Timestamp,
    },

    /// Write-ahead log append or sync failed
    #[error("WAL error: {0}")]
    Wal(String),

    /// Checkpoint collaborator failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for a serialization conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict)
    }

    /// True if rerunning the whole transaction may succeed
    ///
    /// Only conflicts qualify: usage errors repeat deterministically, and a
    /// stopped store stays stopped.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// True for errors caused by calling the API incorrectly
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::ReadOnlyTransaction
                | Error::EmptyKey
                | Error::DuplicateKey(_)
                | Error::EmptyTransaction
                | Error::TransactionFinished
        )
    }
}
