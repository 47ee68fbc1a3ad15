//! Concurrent/Multi-threaded Tests for txnkv-concurrency
//!
//! These tests verify correct behavior under actual concurrent execution:
//!
//! 1. **First-Committer-Wins** - Conflict detection works with real races
//! 2. **No Lost Updates** - Read-modify-write with retry stays serializable
//! 3. **Snapshot Isolation** - Readers never see commits after their begin ts
//! 4. **Timestamp Monotonicity** - Commit timestamps are unique and dense
//! 5. **Durability Order** - The WAL replays to exactly the live store
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! cargo test --test concurrent_tests -- --nocapture --test-threads=1  # sequential for debugging
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use tempfile::TempDir;
use txnkv_concurrency::{Coordinator, Transaction, WaitContext};
use txnkv_core::{Error, Key, Result, Timestamp, Value};
use txnkv_durability::{CommitRecord, FileWal, NoopWal};
use txnkv_storage::VersionedStore;

// ============================================================================
// Test Helpers
// ============================================================================

fn create_coordinator() -> Arc<Coordinator> {
    Arc::new(Coordinator::new(Arc::new(NoopWal), None, true).unwrap())
}

fn begin(c: &Arc<Coordinator>, update: bool) -> Transaction {
    c.begin(update, &WaitContext::background()).unwrap()
}

fn seed(c: &Arc<Coordinator>, pairs: &[(&str, &str)]) -> Timestamp {
    let mut txn = begin(c, true);
    for (k, v) in pairs {
        txn.set(*k, *v).unwrap();
    }
    txn.commit().unwrap()
}

fn read_u64(txn: &mut Transaction, key: &str) -> u64 {
    txn.get(key)
        .unwrap()
        .map(|v| String::from_utf8(v.into_bytes()).unwrap().parse().unwrap())
        .unwrap_or(0)
}

/// Run `f` in a fresh update transaction until it commits without conflict
fn with_retry<F>(c: &Arc<Coordinator>, mut f: F) -> Timestamp
where
    F: FnMut(&mut Transaction) -> Result<()>,
{
    loop {
        let mut txn = begin(c, true);
        f(&mut txn).unwrap();
        match txn.commit() {
            Ok(ts) => return ts,
            Err(e) if e.is_conflict() => continue,
            Err(e) => panic!("unexpected commit error: {}", e),
        }
    }
}

// ============================================================================
// SECTION 1: First-Committer-Wins
// ============================================================================

mod first_committer_wins {
    use super::*;

    /// All transactions read the same key from the same snapshot before any of
    /// them commits. Exactly one commit may succeed.
    #[test]
    fn test_only_one_of_racing_writers_commits() {
        let c = create_coordinator();
        seed(&c, &[("contested", "0")]);

        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));
        let success_count = Arc::new(AtomicUsize::new(0));
        let conflict_count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..num_threads)
            .map(|i| {
                let c = Arc::clone(&c);
                let barrier = Arc::clone(&barrier);
                let success_count = Arc::clone(&success_count);
                let conflict_count = Arc::clone(&conflict_count);

                thread::spawn(move || {
                    let mut txn = begin(&c, true);
                    let _ = txn.get("contested").unwrap();
                    txn.set("contested", i.to_string()).unwrap();

                    // Everyone has read before anyone commits
                    barrier.wait();

                    match txn.commit() {
                        Ok(_) => success_count.fetch_add(1, Ordering::SeqCst),
                        Err(Error::Conflict) => conflict_count.fetch_add(1, Ordering::SeqCst),
                        Err(e) => panic!("unexpected error: {}", e),
                    };
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(success_count.load(Ordering::SeqCst), 1);
        assert_eq!(conflict_count.load(Ordering::SeqCst), num_threads - 1);
        assert_eq!(c.stats().conflicts, (num_threads - 1) as u64);
    }

    /// Transactions that only read never fail, however many writers commit
    #[test]
    fn test_readers_never_conflict() {
        let c = create_coordinator();
        seed(&c, &[("k", "0")]);

        let mut reader = begin(&c, true);
        reader.get("k").unwrap();

        for i in 1..=5 {
            seed(&c, &[("k", i.to_string().as_str())]);
        }

        // Nothing written: commit is a usage error, discard is silent
        assert!(matches!(reader.commit(), Err(Error::EmptyTransaction)));
        reader.discard();
    }
}

// ============================================================================
// SECTION 2: No Lost Updates
// ============================================================================

mod lost_updates {
    use super::*;

    #[test]
    fn test_concurrent_increments_all_land() {
        let c = create_coordinator();
        let threads = 6;
        let per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        with_retry(&c, |txn| {
                            let n = read_u64(txn, "counter");
                            txn.set("counter", (n + 1).to_string())
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut reader = begin(&c, false);
        assert_eq!(read_u64(&mut reader, "counter"), (threads * per_thread) as u64);
    }

    /// Transfers between two accounts keep the total constant for every reader
    #[test]
    fn test_transfers_preserve_invariant() {
        let c = create_coordinator();
        seed(&c, &[("acct:a", "500"), ("acct:b", "500")]);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for round in 0..20u64 {
                        let amount = (i + round) % 7 + 1;
                        with_retry(&c, |txn| {
                            let a = read_u64(txn, "acct:a");
                            let b = read_u64(txn, "acct:b");
                            if a >= amount {
                                txn.set("acct:a", (a - amount).to_string())?;
                                txn.set("acct:b", (b + amount).to_string())?;
                            } else {
                                txn.set("acct:a", (a + amount).to_string())?;
                                txn.set("acct:b", (b - amount).to_string())?;
                            }
                            Ok(())
                        });
                    }
                })
            })
            .collect();

        let reader = {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut txn = begin(&c, false);
                    let total = read_u64(&mut txn, "acct:a") + read_u64(&mut txn, "acct:b");
                    assert_eq!(total, 1000, "reader at ts {} saw a torn transfer", txn.read_ts());
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
    }
}

// ============================================================================
// SECTION 3: Snapshot Isolation
// ============================================================================

mod snapshot_isolation {
    use super::*;

    #[test]
    fn test_long_reader_sees_fixed_snapshot() {
        let c = create_coordinator();
        seed(&c, &[("HDD", "Hard disk")]);

        let mut reader = begin(&c, false);
        let begin_ts = reader.read_ts();

        let writer = {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for i in 0..20 {
                    seed(&c, &[("HDD", format!("rev {}", i).as_str())]);
                }
            })
        };

        for _ in 0..50 {
            assert_eq!(reader.get("HDD").unwrap(), Some(Value::from("Hard disk")));
        }
        writer.join().unwrap();
        assert_eq!(reader.get("HDD").unwrap(), Some(Value::from("Hard disk")));
        assert_eq!(reader.read_ts(), begin_ts);

        let mut fresh = begin(&c, false);
        assert_eq!(fresh.get("HDD").unwrap(), Some(Value::from("rev 19")));
    }

    /// A reader that begins after a commit returns must see it
    #[test]
    fn test_commit_visible_to_next_begin() {
        let c = create_coordinator();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..25 {
                        let key = format!("t{}:{}", t, i);
                        let ts = seed(&c, &[(key.as_str(), "v")]);

                        let mut reader = begin(&c, false);
                        assert!(reader.read_ts() >= ts);
                        assert_eq!(reader.get(key.as_str()).unwrap(), Some(Value::from("v")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

// ============================================================================
// SECTION 4: Timestamp Monotonicity
// ============================================================================

mod timestamps {
    use super::*;

    #[test]
    fn test_disjoint_commits_get_unique_dense_timestamps() {
        let c = create_coordinator();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for i in 0..20 {
                        let ts = seed(&c, &[(format!("k{}-{}", t, i).as_str(), "v")]);
                        seen.lock().push(ts);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), 160);
        assert_eq!(*seen.iter().min().unwrap(), 1);
        assert_eq!(*seen.iter().max().unwrap(), 160);
        assert_eq!(c.stats().committed, 160);

        c.oracle().commit_mark().barrier();
        assert_eq!(c.stats().oracle.commit_done_till, 160);
    }

    #[test]
    fn test_per_thread_timestamps_increase() {
        let c = create_coordinator();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    let mut last_commit = 0;
                    let mut last_read = 0;
                    for i in 0..30 {
                        let txn = begin(&c, false);
                        assert!(txn.read_ts() >= last_read);
                        last_read = txn.read_ts();
                        drop(txn);

                        let ts = seed(&c, &[(format!("{}:{}", t, i).as_str(), "v")]);
                        assert!(ts > last_commit);
                        last_commit = ts;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

// ============================================================================
// SECTION 5: Durability Order
// ============================================================================

mod durability_order {
    use super::*;

    #[test]
    fn test_wal_replay_matches_store() {
        let temp = TempDir::new().unwrap();
        let wal = Arc::new(FileWal::open(temp.path().join("commits.wal")).unwrap());
        let c = Arc::new(Coordinator::new(wal.clone(), None, false).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..25u64 {
                        let key = format!("key{}", (t * 7 + i) % 10);
                        with_retry(&c, |txn| {
                            let n = read_u64(txn, &key);
                            txn.set(key.as_str(), (n + 1).to_string())?;
                            if i % 5 == 0 {
                                txn.delete(format!("gone{}", t))?;
                            }
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records: Vec<CommitRecord> = wal
            .read_all()
            .unwrap()
            .iter()
            .map(|bytes| CommitRecord::decode(bytes).unwrap())
            .collect();
        let versions: Vec<Timestamp> = records.iter().map(|r| r.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted, "WAL must be in commit-timestamp order");

        let replayed = VersionedStore::new();
        for record in records {
            let version = record.version;
            let mutations = record.into_mutations();
            replayed.apply_batch(version, mutations.iter().map(|(k, m)| (k, m)));
        }

        let live = c.store().snapshot(u64::MAX);
        let rebuilt = replayed.snapshot(u64::MAX);
        assert_eq!(rebuilt.len(), live.len());
        for i in 0..10 {
            let key = Key::from(format!("key{}", i));
            assert_eq!(rebuilt.get(&key), live.get(&key));
        }
        assert_eq!(live.scan_prefix(b"key").len(), 10);
    }
}
