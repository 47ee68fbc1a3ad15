//! txnkv - an embedded, in-memory transactional key-value store
//!
//! Transactions run under snapshot isolation with optimistic conflict
//! detection: a commit fails with [`Error::Conflict`] when another transaction
//! that committed after it began wrote a key it read, or any key under a
//! prefix it scanned.
//!
//! # Quick Start
//!
//! ```ignore
//! use txnkv::{Database, Value};
//!
//! let db = Database::new()?;
//!
//! db.update(|txn| txn.set("HDD", "Hard disk"))?;
//!
//! let value = db.view(|txn| txn.get("HDD"))?;
//! assert_eq!(value, Some(Value::from("Hard disk")));
//! ```
//!
//! # Architecture
//!
//! - `txnkv-core`: keys, values, errors, collaborator traits
//! - `txnkv-storage`: the multi-version store and its snapshots
//! - `txnkv-durability`: write-ahead log adapters and the commit record codec
//! - `txnkv-concurrency`: watermarks, the timestamp oracle, the commit executor
//!   and transactions
//!
//! This crate ties them together behind [`Database`].

mod database;

pub use database::{Database, DatabaseBuilder, DatabaseConfig, DatabaseStats, RetryConfig};

pub use txnkv_concurrency::{CancelToken, ReadSet, Transaction, WaitContext};
pub use txnkv_core::{
    Checkpointer, Error, Key, Mutation, Result, Timestamp, Value, VersionedKey, WriteAheadLog,
};
pub use txnkv_durability::{CommitRecord, FileWal, MemoryWal, NoopWal};
pub use txnkv_storage::{Snapshot, VersionedStore};
