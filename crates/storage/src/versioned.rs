//! Versioned store
//!
//! Ordered `(key, version) → mutation` map holding every committed version of
//! every key. Backed by a persistent B-tree (`im::OrdMap`), so taking a copy
//! for a snapshot is O(1): the copy shares structure with the live map and
//! later writes path-copy only the nodes they touch.
//!
//! # Concurrency
//!
//! A single `RwLock` orders mutation against structural copy. The executor is
//! the only writer; snapshots take a read lock just long enough to clone the
//! root, then read their private copy without any lock. A whole commit batch
//! is applied under one write-lock acquisition, so a copy never observes half
//! of a batch.

use im::OrdMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use txnkv_core::{Key, Mutation, Timestamp, VersionedKey};

use crate::snapshot::Snapshot;

/// Find the newest version of `key` at or below `ts`
///
/// Versions of one key are adjacent and ascending in the map, so the answer
/// is the last entry of the range `(key, 0)..=(key, ts)`.
pub(crate) fn lookup_at<'a>(
    data: &'a OrdMap<VersionedKey, Mutation>,
    key: &Key,
    ts: Timestamp,
) -> Option<(Timestamp, &'a Mutation)> {
    let low = VersionedKey::new(key.clone(), 0);
    let high = VersionedKey::new(key.clone(), ts);
    data.range(low..=high)
        .next_back()
        .map(|(vk, mutation)| (vk.version, mutation))
}

/// In-memory multi-version store
///
/// Entries are never removed by the core. Once `(key, version)` is written it
/// stays until an external compaction collaborator rewrites the store.
#[derive(Default)]
pub struct VersionedStore {
    data: RwLock<OrdMap<VersionedKey, Mutation>>,
}

impl VersionedStore {
    /// Create an empty store
    pub fn new() -> Self {
        VersionedStore {
            data: RwLock::new(OrdMap::new()),
        }
    }

    /// Insert an entry, replacing one with exactly the same `(key, version)`
    ///
    /// Replacement only happens when a batch is re-applied; commit timestamps
    /// are unique, so normal operation always inserts.
    pub fn put_or_update(&self, key: VersionedKey, mutation: Mutation) {
        self.data.write().insert(key, mutation);
    }

    /// Apply a whole commit batch at one version
    ///
    /// The batch is built on a structural copy of the map and swapped in under
    /// one write lock, so readers see all of it or none of it. If `entries`
    /// panics partway the store is left unchanged. Returns the number of
    /// entries written.
    pub fn apply_batch<'a, I>(&self, version: Timestamp, entries: I) -> usize
    where
        I: IntoIterator<Item = (&'a Key, &'a Mutation)>,
    {
        // Upgradable: readers continue, other writers wait for the swap
        let current = self.data.upgradable_read();
        let mut next = current.clone();
        let mut applied = 0;
        for (key, mutation) in entries {
            next.insert(VersionedKey::new(key.clone(), version), mutation.clone());
            applied += 1;
        }
        *RwLockUpgradableReadGuard::upgrade(current) = next;
        tracing::trace!(target: "txnkv::storage", version, applied, "Batch applied");
        applied
    }

    /// Exact `(key, version)` lookup
    pub fn get(&self, key: &VersionedKey) -> Option<Mutation> {
        self.data.read().get(key).cloned()
    }

    /// Newest version of `key` at or below `ts`, tombstones included
    pub fn get_at(&self, key: &Key, ts: Timestamp) -> Option<(Timestamp, Mutation)> {
        let data = self.data.read();
        lookup_at(&data, key, ts).map(|(version, mutation)| (version, mutation.clone()))
    }

    /// Every stored version of `key`, newest first
    pub fn history(&self, key: &Key) -> Vec<(Timestamp, Mutation)> {
        let data = self.data.read();
        let low = VersionedKey::new(key.clone(), 0);
        let high = VersionedKey::new(key.clone(), Timestamp::MAX);
        data.range(low..=high)
            .rev()
            .map(|(vk, mutation)| (vk.version, mutation.clone()))
            .collect()
    }

    /// Structural copy sharing no mutable state with `self` going forward
    pub fn copy_for_snapshot(&self) -> VersionedStore {
        VersionedStore {
            data: RwLock::new(self.data.read().clone()),
        }
    }

    /// Freeze a copy of the store at `ts`
    pub fn snapshot(&self, ts: Timestamp) -> Snapshot {
        let data = self.data.read().clone();
        Snapshot::new(ts, data)
    }

    /// Number of `(key, version)` entries
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("entries", &self.len())
            .finish()
    }
}
