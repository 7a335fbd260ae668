//! Full and incremental snapshot capture.
//!
//! Pipeline: read tables → serialize → compress → checksum → upload →
//! insert record. Records are only ever written in a terminal state, so an
//! interrupted run leaves either a `failed` record or nothing, never a
//! `pending` one.

use crate::codec;
use crate::config::Config;
use crate::model::value::{encode_snapshot, non_finite_column};
use crate::model::{BackupRecord, BackupStatus, BackupType, Snapshot};
use crate::store::{BlobStore, ChangedSince, MetadataStore, TableReader};
use crate::utils::cancel::CallContext;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Compressed payload ready for upload
struct Payload {
    bytes: Bytes,
    tables: Vec<String>,
    row_count: usize,
}

pub struct BackupEngine {
    config: Arc<Config>,
    tables: Arc<dyn TableReader>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl BackupEngine {
    pub fn new(
        config: Arc<Config>,
        tables: Arc<dyn TableReader>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            tables,
            blobs,
            metadata,
        }
    }

    /// Snapshot every configured table in full.
    pub async fn create_full_backup(&self, ctx: &CallContext) -> Result<BackupRecord> {
        self.run(BackupType::Full, None, ctx).await
    }

    /// Snapshot rows changed at or after `since`. Tables without changes are
    /// left out of both the payload and the record.
    pub async fn create_incremental_backup(
        &self,
        since: DateTime<Utc>,
        ctx: &CallContext,
    ) -> Result<BackupRecord> {
        self.run(BackupType::Incremental, Some(since), ctx).await
    }

    /// Check that every configured table carries the change-tracking column
    /// incremental capture filters on.
    pub async fn validate_schema(&self, ctx: &CallContext) -> Result<()> {
        let column = self.config.change_column.as_str();
        let mut missing = Vec::new();

        for table in &self.config.tables {
            let present = ctx
                .run("schema check", self.tables.has_column(table, column))
                .await?;
            if !present {
                missing.push(table.as_str());
            }
        }

        if missing.is_empty() {
            debug!(column, "All tables support incremental capture");
            Ok(())
        } else {
            Err(EngineError::Config(format!(
                "tables without change column `{column}`: {}",
                missing.join(", ")
            )))
        }
    }

    async fn run(
        &self,
        backup_type: BackupType,
        since: Option<DateTime<Utc>>,
        ctx: &CallContext,
    ) -> Result<BackupRecord> {
        let started = Utc::now();
        let id = BackupRecord::make_id(backup_type, started);
        let algorithm = self.config.compression.algorithm;
        let key = BackupRecord::blob_key_for(self.config.blob_prefix(), &id, algorithm.extension());

        info!(backup_id = %id, %backup_type, since = ?since, "Starting backup");

        let payload = match self.build_payload(since, ctx).await {
            Ok(payload) => payload,
            Err(e) => return Err(self.record_failure(&id, backup_type, started, &key, e, false, ctx).await),
        };

        // Digest of the exact bytes being uploaded.
        let checksum = codec::sha256_hex(&payload.bytes);
        let size_bytes = payload.bytes.len() as u64;

        if let Err(e) = ctx
            .run("blob upload", self.blobs.put(&key, payload.bytes, algorithm.content_type()))
            .await
        {
            return Err(self.record_failure(&id, backup_type, started, &key, e, false, ctx).await);
        }

        let record = BackupRecord {
            id: id.clone(),
            backup_type,
            timestamp: started,
            schema_version: self.config.schema_version.clone(),
            tables: payload.tables,
            size_bytes,
            compression: algorithm.as_str().to_string(),
            checksum,
            status: BackupStatus::Completed,
            error: None,
        };

        if let Err(e) = ctx.run("metadata insert", self.metadata.insert(&record)).await {
            // An interrupted insert may still have been committed by the store.
            if let Some(stored) = self.committed_record(&id, ctx).await {
                warn!(backup_id = %id, error = %e, "Metadata insert reported an error but the record was stored");
                return Ok(stored);
            }
            return Err(self.record_failure(&id, backup_type, started, &key, e, true, ctx).await);
        }

        info!(
            backup_id = %record.id,
            tables = record.tables.len(),
            rows = payload.row_count,
            size_bytes,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Backup completed"
        );
        Ok(record)
    }

    async fn build_payload(
        &self,
        since: Option<DateTime<Utc>>,
        ctx: &CallContext,
    ) -> Result<Payload> {
        let mut snapshot = Snapshot::new();
        let mut tables = Vec::new();
        let mut row_count = 0usize;

        for table in &self.config.tables {
            let filter = since.map(|at| ChangedSince {
                column: &self.config.change_column,
                at,
            });

            let rows = ctx
                .run(&format!("read of table {table}"), self.tables.read_table(table, filter))
                .await
                .map_err(|e| match e {
                    EngineError::Table { .. }
                    | EngineError::Cancelled(_)
                    | EngineError::Timeout { .. } => e,
                    other => EngineError::table(table, other),
                })?;

            if let Some(column) = rows.iter().find_map(non_finite_column) {
                return Err(EngineError::table(
                    table,
                    format!("column {column} holds a non-finite float"),
                ));
            }

            if since.is_some() && rows.is_empty() {
                debug!(table = %table, "No changed rows, skipping table");
                continue;
            }

            debug!(table = %table, rows = rows.len(), "Captured table");
            row_count += rows.len();
            tables.push(table.clone());
            snapshot.insert(table.clone(), rows);
        }

        let algorithm = self.config.compression.algorithm;
        let level = self.config.compression.level;
        let compressed = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let raw = encode_snapshot(&snapshot)?;
            codec::compress(algorithm, &raw, level)
        })
        .await
        .map_err(|e| EngineError::Compression(format!("encode task failed: {e}")))??;

        Ok(Payload {
            bytes: Bytes::from(compressed),
            tables,
            row_count,
        })
    }

    /// The completed record for `id`, if the store holds one.
    async fn committed_record(&self, id: &str, ctx: &CallContext) -> Option<BackupRecord> {
        let lookup = CallContext::with_timeout(ctx.timeout());
        match lookup.run("metadata lookup", self.metadata.get_by_id(id)).await {
            Ok(Some(record)) if record.is_completed() => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Could not check for a stored record");
                None
            }
        }
    }

    /// Persist a `failed` record for the run and hand the original error back.
    ///
    /// Runs on a deadline-only context so a cancelled run still gets its
    /// audit record. An uploaded blob is removed only once the failed record
    /// is stored: from then on no completed record can claim the same id.
    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        id: &str,
        backup_type: BackupType,
        started: DateTime<Utc>,
        key: &str,
        error: EngineError,
        blob_written: bool,
        ctx: &CallContext,
    ) -> EngineError {
        error!(backup_id = %id, %backup_type, error = %error, "Backup failed");

        let cleanup = CallContext::with_timeout(ctx.timeout());

        let record = BackupRecord {
            id: id.to_string(),
            backup_type,
            timestamp: started,
            schema_version: self.config.schema_version.clone(),
            tables: Vec::new(),
            size_bytes: 0,
            compression: self.config.compression.algorithm.as_str().to_string(),
            checksum: String::new(),
            status: BackupStatus::Failed,
            error: Some(error.to_string()),
        };

        if let Err(e) = cleanup.run("metadata insert", self.metadata.insert(&record)).await {
            error!(backup_id = %id, error = %e, "Failed to persist failed backup record");
            if blob_written {
                warn!(backup_id = %id, key, "Keeping uploaded blob, its record state is unknown");
            }
            return error;
        }

        if blob_written {
            match cleanup.run("blob cleanup", self.blobs.delete(key)).await {
                Ok(()) | Err(EngineError::BlobNotFound(_)) => {}
                Err(e) => {
                    warn!(backup_id = %id, key, error = %e, "Failed to remove blob of failed backup");
                }
            }
        }

        error
    }
}
