//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file. Every section except `tables` has
//! defaults, so a minimal file only lists the tables eligible for backup.

use crate::codec::CompressionAlgorithm;
use crate::utils::errors::{EngineError, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Allow-list of tables eligible for backup, in snapshot order
    pub tables: Vec<String>,

    /// Last-modified column used for incremental capture
    #[serde(default = "default_change_column")]
    pub change_column: String,

    /// Snapshot format tag written into every record
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    /// Deadline applied to each individual store call (seconds)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Re-verify every new backup right after it is written
    #[serde(default = "default_verify_after_backup")]
    pub verify_after_backup: bool,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Keep every backup from the last N days
    #[serde(default = "default_daily")]
    pub daily: u32,

    /// Keep anchor-day backups from the last N weeks
    #[serde(default = "default_weekly")]
    pub weekly: u32,

    /// Keep first-of-month backups from the last N (30-day) months
    #[serde(default = "default_monthly")]
    pub monthly: u32,

    /// Day of the week whose backups survive the weekly tier
    #[serde(default = "default_weekly_anchor")]
    pub weekly_anchor: Weekday,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key prefix (bucket folder) for snapshot blobs
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Compression algorithm (gzip, zstd)
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,

    /// Optional level (0-9 for gzip, 1-22 for zstd)
    #[serde(default)]
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_change_column() -> String {
    "updated_at".to_string()
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_daily() -> u32 {
    7
}

fn default_weekly() -> u32 {
    4
}

fn default_monthly() -> u32 {
    12
}

fn default_weekly_anchor() -> Weekday {
    Weekday::Sun
}

fn default_prefix() -> String {
    "backups".to_string()
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_verify_after_backup() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            weekly_anchor: default_weekly_anchor(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::default(),
            level: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with defaults for everything but the table list
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Config {
            tables: tables.into_iter().map(Into::into).collect(),
            change_column: default_change_column(),
            schema_version: default_schema_version(),
            retention: RetentionConfig::default(),
            storage: StorageConfig::default(),
            compression: CompressionConfig::default(),
            call_timeout_secs: default_call_timeout_secs(),
            verify_after_backup: default_verify_after_backup(),
            log: LogConfig::default(),
        }
    }

    /// Reject configurations the engines cannot run safely.
    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(EngineError::Config("table allow-list is empty".into()));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if !is_identifier(table) {
                return Err(EngineError::Config(format!(
                    "invalid table name: {table:?}"
                )));
            }
            if !seen.insert(table.as_str()) {
                return Err(EngineError::Config(format!("duplicate table: {table}")));
            }
        }

        if !is_identifier(&self.change_column) {
            return Err(EngineError::Config(format!(
                "invalid change column: {:?}",
                self.change_column
            )));
        }

        if self.storage.prefix.trim_matches('/').is_empty() {
            return Err(EngineError::Config("storage prefix is empty".into()));
        }

        if self.schema_version.is_empty() {
            return Err(EngineError::Config("schema version is empty".into()));
        }

        if let Some(level) = self.compression.level {
            let range = self.compression.algorithm.level_range();
            if !range.contains(&level) {
                return Err(EngineError::Config(format!(
                    "compression level {level} outside {range:?} for {}",
                    self.compression.algorithm
                )));
            }
        }

        if self.call_timeout_secs == 0 {
            return Err(EngineError::Config("call_timeout_secs must be > 0".into()));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Normalized blob prefix without surrounding slashes
    pub fn blob_prefix(&self) -> &str {
        self.storage.prefix.trim_matches('/')
    }
}

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
