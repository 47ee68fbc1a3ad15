//! Core types for txnkv
//!
//! This module defines the foundational types:
//! - Timestamp: logical clock shared by begin and commit events
//! - Key / Value: opaque byte strings
//! - Mutation: a buffered write, either a put or a tombstone
//! - VersionedKey: (key, version) pair ordering the versioned store

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Logical timestamp issued by the oracle
///
/// Begin and commit events draw from the same counter. Commit timestamps
/// strictly increase by one per successful `NewCommitTs`; they are never reused.
pub type Timestamp = u64;

/// Write a byte string the way `Debug` shows keys and values: as text when it
/// is valid UTF-8, otherwise as raw bytes.
fn fmt_bytes(name: &str, bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match std::str::from_utf8(bytes) {
        Ok(text) => write!(f, "{}({:?})", name, text),
        Err(_) => write!(f, "{}({:?})", name, bytes),
    }
}

/// Key bytes
///
/// Keys order lexicographically by their bytes. The empty key is representable
/// but rejected by transactions at write time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from anything convertible into bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Raw bytes of the key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the key, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length key
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this key begins with `prefix`
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_bytes("Key", &self.0, f)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Key {
    fn from(bytes: &[u8; N]) -> Self {
        Key(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

/// Opaque value payload
///
/// Equality is byte-exact.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a value from anything convertible into bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Value(bytes.into())
    }

    /// Raw bytes of the value
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the value, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_bytes("Value", &self.0, f)
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(bytes: &[u8; N]) -> Self {
        Value(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value(bytes)
    }
}

/// A buffered write
///
/// Keys are never physically removed by a commit. A delete is stored as a
/// `Delete` tombstone at the commit version and hides older versions from
/// snapshots taken at or after that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Write a value
    Put(Value),
    /// Tombstone
    Delete,
}

impl Mutation {
    /// The written value, or None for a tombstone
    pub fn value(&self) -> Option<&Value> {
        match self {
            Mutation::Put(value) => Some(value),
            Mutation::Delete => None,
        }
    }

    /// Consume the mutation, returning the written value if any
    pub fn into_value(self) -> Option<Value> {
        match self {
            Mutation::Put(value) => Some(value),
            Mutation::Delete => None,
        }
    }

    /// True for a delete
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Mutation::Delete)
    }
}

/// Key of the versioned store
///
/// Ordered primarily by key bytes, then by version, so all versions of one
/// key are adjacent and ascending.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionedKey {
    /// User key
    pub key: Key,
    /// Commit timestamp of this version
    pub version: Timestamp,
}

impl VersionedKey {
    /// Pair a key with a version
    pub fn new(key: Key, version: Timestamp) -> Self {
        VersionedKey { key, version }
    }
}
