use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::errors::EngineError;

// ── BackupType ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            other => Err(EngineError::Metadata(format!("unknown backup type: {other}"))),
        }
    }
}

// ── BackupStatus ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::Pending)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(EngineError::Metadata(format!("unknown backup status: {other}"))),
        }
    }
}

// ── BackupRecord ──

/// Metadata for one snapshot. Written once, already in a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub tables: Vec<String>,
    pub size_bytes: u64,
    pub compression: String,
    pub checksum: String,
    pub status: BackupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupRecord {
    /// `{type}-{epochMillis}`
    pub fn make_id(backup_type: BackupType, timestamp: DateTime<Utc>) -> String {
        format!("{}-{}", backup_type, timestamp.timestamp_millis())
    }

    /// Blob key the payload of backup `id` lives under.
    pub fn blob_key_for(prefix: &str, id: &str, extension: &str) -> String {
        format!("{}/{}.{}", prefix.trim_matches('/'), id, extension)
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == BackupStatus::Failed
    }
}

// ── RecordFilter ──

/// Narrowing for `MetadataStore::list`. Empty filter lists everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Strictly older than this instant
    pub before: Option<DateTime<Utc>>,
    /// At or after this instant
    pub after: Option<DateTime<Utc>>,
    pub backup_type: Option<BackupType>,
    pub status: Option<BackupStatus>,
}

impl RecordFilter {
    pub fn older_than(cutoff: DateTime<Utc>) -> Self {
        Self {
            before: Some(cutoff),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(BackupStatus::Completed),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &BackupRecord) -> bool {
        if let Some(before) = self.before {
            if record.timestamp >= before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if record.timestamp < after {
                return false;
            }
        }
        if let Some(backup_type) = self.backup_type {
            if record.backup_type != backup_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(ts: DateTime<Utc>, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            id: BackupRecord::make_id(BackupType::Full, ts),
            backup_type: BackupType::Full,
            timestamp: ts,
            schema_version: "1.0".into(),
            tables: vec!["employees".into()],
            size_bytes: 10,
            compression: "gzip".into(),
            checksum: "ab".into(),
            status,
            error: None,
        }
    }

    #[test]
    fn test_id_and_key_format() {
        let ts = Utc.timestamp_millis_opt(1_718_000_000_123).unwrap();
        let id = BackupRecord::make_id(BackupType::Incremental, ts);
        assert_eq!(id, "incremental-1718000000123");
        assert_eq!(
            BackupRecord::blob_key_for("/backups/", &id, "json.gz"),
            "backups/incremental-1718000000123.json.gz"
        );
    }

    #[test]
    fn test_record_json_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_value(sample(ts, BackupStatus::Completed)).unwrap();
        assert_eq!(json["type"], "full");
        assert_eq!(json["schemaVersion"], "1.0");
        assert_eq!(json["sizeBytes"], 10);
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_filter_matches() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let old = sample(t0, BackupStatus::Completed);
        let failed = sample(t1, BackupStatus::Failed);

        assert!(RecordFilter::older_than(t1).matches(&old));
        assert!(!RecordFilter::older_than(t1).matches(&failed));
        assert!(RecordFilter::completed().matches(&old));
        assert!(!RecordFilter::completed().matches(&failed));
        assert!(RecordFilter::default().matches(&failed));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("failed".parse::<BackupStatus>().unwrap(), BackupStatus::Failed);
        assert!("done".parse::<BackupStatus>().is_err());
        assert!(!BackupStatus::Pending.is_terminal());
    }
}
