//! Database handle
//!
//! `Database` is the entry point for applications. It owns one coordinator
//! (oracle, executor, versioned store) and exposes closure-scoped transactions:
//!
//! - [`view`](Database::view) runs a read-only transaction
//! - [`update`](Database::update) runs a read-write transaction and commits it
//!   when the closure returns `Ok`
//! - [`update_with_retry`](Database::update_with_retry) reruns an update on
//!   conflict with the configured backoff
//!
//! A transaction left behind by an `Err` return or a panic is discarded when it
//! is dropped, so the read watermark always drains.

mod builder;
mod config;
mod stats;
mod transactions;

pub use builder::DatabaseBuilder;
pub use config::DatabaseConfig;
pub use stats::DatabaseStats;
pub use transactions::RetryConfig;

use std::sync::Arc;
use tracing::{debug, info, warn};
use txnkv_concurrency::{Coordinator, Transaction, WaitContext};
use txnkv_core::{Checkpointer, Result, WriteAheadLog};

/// An in-memory transactional key-value store
pub struct Database {
    coordinator: Arc<Coordinator>,
    config: DatabaseConfig,
}

impl Database {
    /// Open an empty database with the default config and no write-ahead log
    pub fn new() -> Result<Self> {
        DatabaseBuilder::new().open()
    }

    /// Builder for custom configuration
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub(crate) fn open_with(
        config: DatabaseConfig,
        wal: Arc<dyn WriteAheadLog>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Result<Self> {
        let coordinator = Coordinator::new(wal, checkpointer, config.sync_wal_on_commit)?;
        info!(
            target: "txnkv::db",
            sync_wal_on_commit = config.sync_wal_on_commit,
            read_wait_timeout_ms = ?config.read_wait_timeout_ms,
            "Database opened"
        );
        Ok(Database {
            coordinator: Arc::new(coordinator),
            config,
        })
    }

    /// Configuration this database was opened with
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // ========================================================================
    // Closure API
    // ========================================================================

    /// Run `f` in a read-only transaction
    ///
    /// # Errors
    ///
    /// `Error::StoreStopped`, a begin-wait error, or whatever `f` returns.
    pub fn view<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        self.view_with_context(&self.config.wait_context(), f)
    }

    /// [`view`](Self::view) with an explicit wait context
    pub fn view_with_context<F, T>(&self, ctx: &WaitContext, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.coordinator.begin(false, ctx)?;
        let result = f(&mut txn);
        txn.discard();
        result
    }

    /// Run `f` in a read-write transaction and commit it
    ///
    /// The transaction commits only if `f` returns `Ok`. On `Err`, or if `f`
    /// panics, it is discarded and nothing is written.
    ///
    /// # Errors
    ///
    /// - whatever `f` returns
    /// - `Error::EmptyTransaction` if `f` wrote nothing
    /// - `Error::Conflict` if a concurrent commit invalidated a read
    /// - `Error::StoreStopped`, `Error::Wal`, or a begin-wait error
    pub fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        self.update_with_context(&self.config.wait_context(), f)
    }

    /// [`update`](Self::update) with an explicit wait context
    pub fn update_with_context<F, T>(&self, ctx: &WaitContext, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.coordinator.begin(true, ctx)?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Run an update, retrying on conflict with the configured backoff
    ///
    /// Uses the [`RetryConfig`] set through
    /// [`DatabaseBuilder::retry`](crate::DatabaseBuilder::retry), or the
    /// default policy when none was set.
    ///
    /// # Example
    /// ```ignore
    /// db.update_with_retry(|txn| {
    ///     let n = txn.get("counter")?.map(decode).unwrap_or(0);
    ///     txn.set("counter", encode(n + 1))
    /// })?;
    /// ```
    pub fn update_with_retry<F, T>(&self, f: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        self.update_with_retry_config(&self.config.retry, f)
    }

    /// Run an update, retrying on conflict under an explicit policy
    ///
    /// The closure is called repeatedly until either:
    /// - The transaction commits successfully
    /// - A non-conflict error occurs (not retried)
    /// - Maximum retries are exceeded
    ///
    /// Each attempt begins from a fresh timestamp.
    pub fn update_with_retry_config<F, T>(&self, config: &RetryConfig, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.update(&mut f) {
                Err(e) if e.is_conflict() && attempt < config.max_retries => {
                    let delay = config.calculate_delay(attempt);
                    debug!(target: "txnkv::db", attempt, delay_ms = delay.as_millis() as u64, "Retrying after conflict");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) if e.is_conflict() => {
                    warn!(target: "txnkv::db", attempts = attempt + 1, "Giving up after repeated conflicts");
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    // ========================================================================
    // Manual transactions
    // ========================================================================

    /// Begin a transaction for manual control
    ///
    /// Call `commit` or `discard` on it; dropping it discards.
    pub fn begin(&self, read_write: bool) -> Result<Transaction> {
        self.begin_with_context(read_write, &self.config.wait_context())
    }

    /// [`begin`](Self::begin) with an explicit wait context
    pub fn begin_with_context(&self, read_write: bool, ctx: &WaitContext) -> Result<Transaction> {
        self.coordinator.begin(read_write, ctx)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop the database; idempotent
    ///
    /// Queued commits finish applying. Later calls fail with
    /// `Error::StoreStopped`, as do transactions still open.
    pub fn stop(&self) {
        if self.coordinator.is_stopped() {
            return;
        }
        self.coordinator.stop();
        let stats = self.stats();
        info!(
            target: "txnkv::db",
            committed = stats.committed,
            aborted = stats.aborted,
            "Database stopped"
        );
    }

    /// True once [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.coordinator.is_stopped()
    }

    /// Current metrics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats::from(self.coordinator.stats())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
