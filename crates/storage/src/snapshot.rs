//! Snapshot
//!
//! A frozen, read-only view of the versioned store at a fixed timestamp `ts`.
//! A read returns the newest version of the key whose commit timestamp is at
//! or below `ts`; a tombstone at that version reads as not-found.
//!
//! The snapshot owns a structural copy of the store's map, so reads take no
//! lock and writes committed after the copy was taken are never visible.

use im::OrdMap;
use txnkv_core::{Key, Mutation, Timestamp, Value, VersionedKey};

use crate::versioned::lookup_at;

/// Point-in-time view of the versioned store
#[derive(Clone)]
pub struct Snapshot {
    ts: Timestamp,
    data: OrdMap<VersionedKey, Mutation>,
}

impl Snapshot {
    pub(crate) fn new(ts: Timestamp, data: OrdMap<VersionedKey, Mutation>) -> Self {
        Snapshot { ts, data }
    }

    /// Timestamp this snapshot reads at
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Value of `key` as of `ts`, or None if absent or deleted
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.get_versioned(key)
            .and_then(|(_, mutation)| mutation.into_value())
    }

    /// Newest mutation of `key` at or below `ts` together with its version
    ///
    /// Unlike [`get`](Self::get) this surfaces tombstones.
    pub fn get_versioned(&self, key: &Key) -> Option<(Timestamp, Mutation)> {
        lookup_at(&self.data, key, self.ts).map(|(version, mutation)| (version, mutation.clone()))
    }

    /// Live keys starting with `prefix` as of `ts`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Key, Value)> {
        let start = VersionedKey::new(Key::from(prefix), 0);
        let mut out = Vec::new();
        // Versions ascend within a key, so the last one at or below ts wins
        let mut current: Option<(&Key, Option<&Mutation>)> = None;

        for (vk, mutation) in self.data.range(start..) {
            if !vk.key.starts_with(prefix) {
                break;
            }
            match current {
                Some((key, _)) if key == &vk.key => {}
                _ => {
                    if let Some((key, Some(Mutation::Put(value)))) = current.take() {
                        out.push((key.clone(), value.clone()));
                    }
                    current = Some((&vk.key, None));
                }
            }
            if vk.version <= self.ts {
                if let Some((_, visible)) = current.as_mut() {
                    *visible = Some(mutation);
                }
            }
        }
        if let Some((key, Some(Mutation::Put(value)))) = current {
            out.push((key.clone(), value.clone()));
        }
        out
    }

    /// Number of `(key, version)` entries in the copy, at any version
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the copy holds no entries
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("ts", &self.ts)
            .field("entries", &self.data.len())
            .finish()
    }
}
