//! Database configuration
//!
//! Settings can be built in code, through [`DatabaseBuilder`](super::DatabaseBuilder),
//! or parsed from TOML text. Every field has a default, so an empty document
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txnkv_concurrency::WaitContext;
use txnkv_core::{Error, Result};

use super::transactions::RetryConfig;

/// Database configuration
///
/// # Example
///
/// ```toml
/// # Give up waiting for in-flight commits after 500ms (omit to wait forever)
/// read_wait_timeout_ms = 500
///
/// # fsync the write-ahead log after every commit
/// sync_wal_on_commit = true
///
/// [retry]
/// max_retries = 5
/// base_delay_ms = 10
/// max_delay_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Deadline for the commit-watermark wait when a transaction begins.
    /// `None` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_wait_timeout_ms: Option<u64>,
    /// Call `WriteAheadLog::sync` after every append
    #[serde(default = "default_sync_wal_on_commit")]
    pub sync_wal_on_commit: bool,
    /// Backoff used by `Database::update_with_retry`
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_sync_wal_on_commit() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            read_wait_timeout_ms: None,
            sync_wal_on_commit: default_sync_wal_on_commit(),
            retry: RetryConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if the text is not valid TOML, has a field of
    /// the wrong type, or fails [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DatabaseConfig = toml::from_str(text)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::InvalidConfig(msg) => {
                Error::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Serialize this config to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Check field ranges
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if `read_wait_timeout_ms` is zero (use `None`
    /// to wait forever) or the retry base delay exceeds its maximum.
    pub fn validate(&self) -> Result<()> {
        if self.read_wait_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "read_wait_timeout_ms must be positive; omit it to wait forever".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// The begin-wait deadline as a duration
    pub fn read_wait_timeout(&self) -> Option<Duration> {
        self.read_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Context applied to transactions begun without an explicit one
    pub fn wait_context(&self) -> WaitContext {
        match self.read_wait_timeout() {
            Some(timeout) => WaitContext::with_timeout(timeout),
            None => WaitContext::background(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.read_wait_timeout_ms, None);
        assert!(config.sync_wal_on_commit);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.wait_context().deadline().is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = DatabaseConfig::from_toml_str("").unwrap();
        assert_eq!(config, DatabaseConfig::default());
    }

    #[test]
    fn parse_all_fields() {
        let config = DatabaseConfig::from_toml_str(
            r#"
read_wait_timeout_ms = 250
sync_wal_on_commit = false

[retry]
max_retries = 5
base_delay_ms = 1
max_delay_ms = 20
"#,
        )
        .unwrap();

        assert_eq!(config.read_wait_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.sync_wal_on_commit);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.max_delay_ms, 20);
        assert!(config.wait_context().deadline().is_some());
    }

    #[test]
    fn partial_retry_table_keeps_other_defaults() {
        let config = DatabaseConfig::from_toml_str("[retry]\nmax_retries = 9\n").unwrap();
        assert_eq!(config.retry.max_retries, 9);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert!(config.sync_wal_on_commit);
    }

    #[test]
    fn wrong_type_is_invalid_config() {
        let err = DatabaseConfig::from_toml_str("sync_wal_on_commit = \"yes\"").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = DatabaseConfig::from_toml_str("read_wait_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn inverted_retry_delays_rejected() {
        let config = DatabaseConfig {
            retry: RetryConfig::new().with_base_delay_ms(500).with_max_delay_ms(5),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn toml_round_trip() {
        let config = DatabaseConfig {
            read_wait_timeout_ms: Some(1000),
            sync_wal_on_commit: false,
            retry: RetryConfig::no_retry(),
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("[retry]"));
        assert_eq!(DatabaseConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn round_trip_without_timeout_omits_field() {
        let text = DatabaseConfig::default().to_toml().unwrap();
        assert!(!text.contains("read_wait_timeout_ms"));
        assert_eq!(DatabaseConfig::from_toml_str(&text).unwrap(), DatabaseConfig::default());
    }

    #[test]
    fn from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("txnkv.toml");
        std::fs::write(&path, "read_wait_timeout_ms = 42\n").unwrap();

        let config = DatabaseConfig::from_file(&path).unwrap();
        assert_eq!(config.read_wait_timeout_ms, Some(42));

        let missing = DatabaseConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
