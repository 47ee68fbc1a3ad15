//! Concurrency layer for txnkv
//!
//! This crate implements timestamp-ordered optimistic concurrency control:
//! - WaterMark: done-till tracking with blocking waits (pure core in MarkState)
//! - WaitContext / CancelToken: deadlines and cancellation for those waits
//! - Oracle: begin/commit timestamps and read-set × write-set conflict checks
//! - Executor: single writer applying batches in commit-timestamp order
//! - WriteBatch / ReadSet: ordered, deduplicated write buffer and observed keys and prefixes
//! - Transaction: snapshot reads, buffered writes, commit and discard
//! - Coordinator: the oracle, executor, and store shared by all transactions
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. oracle.new_commit_ts()   - conflict check, assign commit_ts (under oracle lock)
//! 2. executor.submit()        - queue the batch
//! 3. completion.wait()        - WAL append/sync, apply to store in ts order
//! 4. oracle.done_commit()     - release readers waiting on commit_ts
//! ```
//!
//! If step 3 fails the commit is abandoned: the timestamp stays consumed but
//! is released on the commit watermark, and nothing is applied.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod context;
pub mod coordinator;
pub mod executor;
mod mailbox;
pub mod oracle;
pub mod transaction;
pub mod watermark;

pub use batch::{ReadSet, WriteBatch};
pub use context::{CancelToken, WaitContext};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use executor::{Completion, Executor};
pub use oracle::{Oracle, OracleStats};
pub use transaction::Transaction;
pub use watermark::{MarkState, WaterMark};
