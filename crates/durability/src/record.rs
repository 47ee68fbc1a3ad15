//! Commit record serialization for WAL frames
//!
//! Each committed batch is serialized into a single `CommitRecord` blob and
//! appended to the write-ahead log before it is applied to the versioned
//! store. Puts and deletes are kept in separate lists; keys within one batch
//! are unique, so replay order between the two lists does not matter.
//!
//! ## Format
//!
//! MessagePack (`rmp-serde`) for compact binary encoding with schema evolution
//! support.

use serde::{Deserialize, Serialize};
use txnkv_core::{Error, Key, Mutation, Result, Timestamp, Value};

/// Serializable record of one committed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit timestamp shared by every write in the batch
    pub version: Timestamp,
    /// Keys written with a value
    pub puts: Vec<(Key, Value)>,
    /// Keys written with a tombstone
    pub deletes: Vec<Key>,
}

impl CommitRecord {
    /// Build a record from a batch's mutations
    pub fn from_mutations<'a, I>(version: Timestamp, mutations: I) -> Self
    where
        I: IntoIterator<Item = (&'a Key, &'a Mutation)>,
    {
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for (key, mutation) in mutations {
            match mutation {
                Mutation::Put(value) => puts.push((key.clone(), value.clone())),
                Mutation::Delete => deletes.push(key.clone()),
            }
        }
        CommitRecord {
            version,
            puts,
            deletes,
        }
    }

    /// Serialize to MessagePack bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from MessagePack bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to decode commit record: {}", e)))
    }

    /// Total number of writes in the record
    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    /// True if the record carries no writes
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    /// Flatten back into `(key, mutation)` pairs, puts first
    pub fn into_mutations(self) -> Vec<(Key, Mutation)> {
        let mut out: Vec<(Key, Mutation)> = self
            .puts
            .into_iter()
            .map(|(k, v)| (k, Mutation::Put(v)))
            .collect();
        out.extend(self.deletes.into_iter().map(|k| (k, Mutation::Delete)));
        out
    }
}
