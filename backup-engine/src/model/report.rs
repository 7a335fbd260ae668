//! Requests and results of the restore, verify and prune operations.
//!
//! None of these are persisted; they are returned to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub backup_id: String,
    /// Subset to restore; `None` restores every table in the backup
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: bool,
}

impl RestoreRequest {
    pub fn new(backup_id: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            tables: None,
            dry_run: false,
        }
    }

    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Result of a restore that got past the checksum gate.
///
/// `success == false` means some tables failed while others may have been
/// written; fatal failures are returned as errors instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub success: bool,
    pub restored_tables: Vec<String>,
    pub errors: Vec<String>,
    /// Rows written, or that would be written on a dry run, per restored table
    pub row_counts: BTreeMap<String, usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl VerificationReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: usize,
    /// Candidates retained by the weekly or monthly tier
    pub kept: usize,
    pub errors: Vec<String>,
}
