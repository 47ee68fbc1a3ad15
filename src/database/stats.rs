//! Database statistics

use txnkv_concurrency::CoordinatorStats;
use txnkv_core::Timestamp;

/// Point-in-time metrics of one database
///
/// Counters are read with relaxed ordering and may be slightly stale relative
/// to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Transactions begun
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Failed commits plus update transactions discarded without committing
    pub aborted: u64,
    /// Commits rejected with a conflict
    pub conflicts: u64,
    /// Transactions still open
    pub active: u64,
    /// Begin timestamp the next transaction would get
    pub read_ts: Timestamp,
    /// Commit timestamp the next committer would get
    pub next_commit_ts: Timestamp,
    /// Every commit at or below this is visible
    pub commit_done_till: Timestamp,
    /// Every reader at or below this has finished
    pub read_done_till: Timestamp,
    /// Ready-to-commit records kept for conflict detection
    pub retained_commits: usize,
    /// `(key, version)` entries in the store, tombstones included
    pub stored_versions: usize,
}

impl DatabaseStats {
    /// Fraction of finished update attempts that ended in a conflict
    pub fn conflict_rate(&self) -> f64 {
        let attempts = self.committed + self.conflicts;
        if attempts == 0 {
            0.0
        } else {
            self.conflicts as f64 / attempts as f64
        }
    }
}

impl From<CoordinatorStats> for DatabaseStats {
    fn from(stats: CoordinatorStats) -> Self {
        DatabaseStats {
            started: stats.started,
            committed: stats.committed,
            aborted: stats.aborted,
            conflicts: stats.conflicts,
            active: stats.active,
            read_ts: stats.oracle.read_ts,
            next_commit_ts: stats.oracle.next_commit_ts,
            commit_done_till: stats.oracle.commit_done_till,
            read_done_till: stats.oracle.read_done_till,
            retained_commits: stats.oracle.retained_commits,
            stored_versions: stats.stored_versions,
        }
    }
}
