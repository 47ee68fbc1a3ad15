//! Database builder for fluent configuration
//!
//! Collects the configuration and the collaborators a database is opened
//! with: the write-ahead log that receives every commit and the optional
//! checkpointer driven by read-watermark progress.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use txnkv_core::{Checkpointer, Result, WriteAheadLog};
use txnkv_durability::{FileWal, NoopWal};

use super::config::DatabaseConfig;
use super::transactions::RetryConfig;
use super::Database;

// ============================================================================
// Database Builder Pattern
// ============================================================================

/// Builder for Database configuration
///
/// ```ignore
/// use txnkv::Database;
///
/// // 1. In-memory with defaults
/// let db = Database::new()?;
///
/// // 2. Builder with a file-backed log
/// let db = Database::builder()
///     .file_wal("/data/commits.wal")?
///     .read_wait_timeout(Duration::from_millis(500))
///     .open()?;
/// ```
#[derive(Default)]
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    wal: Option<Arc<dyn WriteAheadLog>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl DatabaseBuilder {
    /// Create new builder with the default config and no log
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Deadline for the commit-watermark wait when a transaction begins
    ///
    /// Rounded up to whole milliseconds, so any non-zero timeout stays
    /// non-zero. A zero timeout is rejected when the database opens.
    pub fn read_wait_timeout(mut self, timeout: Duration) -> Self {
        let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
        self.config.read_wait_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Whether the log is synced after every commit
    pub fn sync_wal_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_wal_on_commit = sync;
        self
    }

    /// Retry policy for [`Database::update_with_retry`]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Log every commit to `wal`
    pub fn wal(mut self, wal: Arc<dyn WriteAheadLog>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Log every commit to a [`FileWal`] at `path`
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be created or opened.
    pub fn file_wal(self, path: impl AsRef<Path>) -> Result<Self> {
        let wal = FileWal::open(path)?;
        Ok(self.wal(Arc::new(wal)))
    }

    /// Run `checkpointer` as the read watermark advances
    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Open the database
    ///
    /// Without a configured log, commits go to a [`NoopWal`].
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` if the configuration fails validation
    /// - `Error::Io` if a worker thread cannot be spawned
    pub fn open(self) -> Result<Database> {
        self.config.validate()?;
        let wal = self.wal.unwrap_or_else(|| Arc::new(NoopWal));
        Database::open_with(self.config, wal, self.checkpointer)
    }
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("config", &self.config)
            .field("wal", &self.wal.is_some())
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use txnkv_core::Error;
    use txnkv_durability::MemoryWal;

    #[test]
    fn test_builder_sets_config() {
        let builder = DatabaseBuilder::new()
            .read_wait_timeout(Duration::from_millis(75))
            .sync_wal_on_commit(false)
            .retry(RetryConfig::no_retry());

        let db = builder.open().unwrap();
        assert_eq!(db.config().read_wait_timeout_ms, Some(75));
        assert!(!db.config().sync_wal_on_commit);
        assert_eq!(db.config().retry.max_retries, 0);
    }

    #[test]
    fn test_sub_millisecond_timeout_rounds_up() {
        let db = DatabaseBuilder::new()
            .read_wait_timeout(Duration::from_micros(500))
            .open()
            .unwrap();
        assert_eq!(db.config().read_wait_timeout_ms, Some(1));

        let builder = DatabaseBuilder::new().read_wait_timeout(Duration::from_micros(1_001));
        assert_eq!(builder.config.read_wait_timeout_ms, Some(2));

        let builder = DatabaseBuilder::new().read_wait_timeout(Duration::MAX);
        assert_eq!(builder.config.read_wait_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_zero_timeout_fails_open() {
        let err = DatabaseBuilder::new()
            .read_wait_timeout(Duration::ZERO)
            .open()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_config_fails_open() {
        let config = DatabaseConfig {
            read_wait_timeout_ms: Some(0),
            ..Default::default()
        };
        let err = DatabaseBuilder::new().config(config).open().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_commits_reach_configured_wal() {
        let wal = Arc::new(MemoryWal::new());
        let db = DatabaseBuilder::new().wal(wal.clone()).open().unwrap();

        db.update(|txn| txn.set("HDD", "Hard disk")).unwrap();
        assert_eq!(wal.len(), 1);
        assert_eq!(wal.sync_count(), 1);
    }

    #[test]
    fn test_file_wal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("commits.wal");
        let db = DatabaseBuilder::new().file_wal(&path).unwrap().open().unwrap();

        db.update(|txn| txn.set("k", "v")).unwrap();
        db.stop();

        let wal = FileWal::open(&path).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }
}
