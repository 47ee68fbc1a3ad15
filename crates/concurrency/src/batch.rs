//! Write batch and read set
//!
//! The write buffer of one transaction. Insertion order is preserved and a key
//! can be written only once: a second write to the same key is rejected rather
//! than overwriting the first.
//!
//! The read set is what the transaction observed: point keys from `get` and
//! whole prefixes from `scan_prefix`. A prefix stands for every key under it,
//! including keys that were absent or deleted when scanned.

use std::collections::{HashMap, HashSet};
use txnkv_core::{Error, Key, Mutation, Result};

/// Ordered, deduplicated buffer of pending writes
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<(Key, Mutation)>,
    index: HashMap<Key, usize>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write
    ///
    /// # Errors
    ///
    /// `Error::DuplicateKey` if the key is already in the batch; the batch is
    /// left unchanged.
    pub fn insert(&mut self, key: Key, mutation: Mutation) -> Result<()> {
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateKey(key));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, mutation));
        Ok(())
    }

    /// Buffered mutation for `key`
    pub fn get(&self, key: &Key) -> Option<&Mutation> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    /// True if `key` was written
    pub fn contains(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    /// Number of buffered writes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was written
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Mutation)> {
        self.entries.iter().map(|(k, m)| (k, m))
    }

    /// Written keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Consume the batch, returning writes in insertion order
    pub fn into_entries(self) -> Vec<(Key, Mutation)> {
        self.entries
    }
}

/// Keys and key ranges a transaction read from its snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSet {
    keys: Vec<Key>,
    prefixes: Vec<Vec<u8>>,
}

impl ReadSet {
    /// Create an empty read set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a point read
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Record a scan of every key starting with `prefix`
    pub fn add_prefix(&mut self, prefix: &[u8]) {
        if !self.prefixes.iter().any(|p| p.as_slice() == prefix) {
            self.prefixes.push(prefix.to_vec());
        }
    }

    /// Point reads, in read order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Scanned prefixes, in first-scan order
    pub fn prefixes(&self) -> &[Vec<u8>] {
        &self.prefixes
    }

    /// True if nothing was read
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }

    /// True if any of `written` falls inside this read set
    pub fn overlaps(&self, written: &HashSet<Key>) -> bool {
        self.keys.iter().any(|k| written.contains(k))
            || self
                .prefixes
                .iter()
                .any(|p| written.iter().any(|k| k.starts_with(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txnkv_core::Value;

    fn put(v: &str) -> Mutation {
        Mutation::Put(Value::from(v))
    }

    #[test]
    fn test_preserves_insertion_order() {
        let mut batch = WriteBatch::new();
        batch.insert(Key::from("zeta"), put("z")).unwrap();
        batch.insert(Key::from("alpha"), put("a")).unwrap();
        batch.insert(Key::from("mid"), Mutation::Delete).unwrap();

        let keys: Vec<&Key> = batch.keys().collect();
        assert_eq!(keys, vec![&Key::from("zeta"), &Key::from("alpha"), &Key::from("mid")]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let mut batch = WriteBatch::new();
        batch.insert(Key::from("HDD"), put("Hard disk")).unwrap();

        let err = batch.insert(Key::from("HDD"), put("Hard disk drive")).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(ref k) if k == &Key::from("HDD")));

        // A delete of an already written key is a duplicate too
        assert!(batch.insert(Key::from("HDD"), Mutation::Delete).is_err());
        assert_eq!(batch.get(&Key::from("HDD")), Some(&put("Hard disk")));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.insert(Key::from("gone"), Mutation::Delete).unwrap();

        assert!(batch.contains(&Key::from("gone")));
        assert_eq!(batch.get(&Key::from("gone")), Some(&Mutation::Delete));
        assert_eq!(batch.get(&Key::from("other")), None);
    }

    #[test]
    fn test_into_entries() {
        let mut batch = WriteBatch::new();
        batch.insert(Key::from("b"), put("2")).unwrap();
        batch.insert(Key::from("a"), put("1")).unwrap();

        assert_eq!(
            batch.into_entries(),
            vec![(Key::from("b"), put("2")), (Key::from("a"), put("1"))]
        );
    }

    #[test]
    fn test_read_set_overlap() {
        let written: HashSet<Key> = [Key::from("user:2"), Key::from("order:9")]
            .into_iter()
            .collect();

        let mut reads = ReadSet::new();
        assert!(reads.is_empty());
        reads.add_key(Key::from("user:1"));
        assert!(!reads.overlaps(&written));

        // A scanned prefix covers keys that did not exist at scan time
        reads.add_prefix(b"user:");
        reads.add_prefix(b"user:");
        assert_eq!(reads.prefixes().len(), 1);
        assert!(reads.overlaps(&written));

        let mut point = ReadSet::new();
        point.add_key(Key::from("order:9"));
        assert!(point.overlaps(&written));
    }
}
