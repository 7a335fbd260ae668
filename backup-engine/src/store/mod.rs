//! Narrow interfaces to the external collaborators.
//!
//! The engines only ever talk to the relational store, the blob store and
//! the metadata store through these traits. `memory` holds in-process
//! implementations; `fs` stores blobs on a local filesystem.

pub mod fs;
pub mod memory;

use crate::model::{BackupRecord, RecordFilter, Row};
use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// "last-modified >= at" predicate for incremental reads.
#[derive(Debug, Clone, Copy)]
pub struct ChangedSince<'a> {
    pub column: &'a str,
    pub at: DateTime<Utc>,
}

/// Read side of the relational store.
///
/// Failures must be reported as `EngineError::Table` so they can be
/// attributed to the table that caused them.
#[async_trait]
pub trait TableReader: Send + Sync {
    /// All rows of `table`, or only those matching `since` when given.
    async fn read_table(&self, table: &str, since: Option<ChangedSince<'_>>) -> Result<Vec<Row>>;

    /// Whether `table` has `column`; used to validate incremental capture.
    async fn has_column(&self, table: &str, column: &str) -> Result<bool>;
}

/// Write side of the relational store. Both calls must be safe to retry.
#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn delete_all_rows(&self, table: &str) -> Result<()>;

    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<()>;
}

/// Key-addressed object storage. Missing keys are `EngineError::BlobNotFound`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Persistence for backup records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: &BackupRecord) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>>;

    /// Matching records ordered by timestamp, oldest first.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<BackupRecord>>;

    /// Returns whether a record was removed.
    async fn delete_by_id(&self, id: &str) -> Result<bool>;
}
