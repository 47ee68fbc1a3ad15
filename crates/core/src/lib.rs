//! Core types and traits for txnkv
//!
//! This crate defines the foundational types used throughout the system:
//! - Timestamp: logical clock value issued by the oracle
//! - Key / Value: opaque byte strings
//! - Mutation: buffered put or tombstone
//! - VersionedKey: ordering key of the versioned store
//! - Error: error taxonomy shared by every layer
//! - Traits: collaborator contracts (WriteAheadLog, Checkpointer)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Checkpointer, WriteAheadLog};
pub use types::{Key, Mutation, Timestamp, Value, VersionedKey};
