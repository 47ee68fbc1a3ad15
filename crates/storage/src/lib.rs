//! Storage layer for txnkv
//!
//! This crate implements the multi-version store:
//! - VersionedStore: ordered `(key, version) → mutation` map with O(1) structural copy
//! - Snapshot: lock-free point-in-time view resolving reads by predecessor lookup
//!
//! # Ordering
//!
//! Entries sort by key bytes, then by version. Every version of a key is
//! adjacent and ascending, so "newest version at or below ts" is the last
//! entry of one bounded range scan.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot;
pub mod versioned;

pub use snapshot::Snapshot;
pub use versioned::VersionedStore;
