//! Facade over the four engines.
//!
//! Schedulers and operator tooling go through [`BackupService`]. It builds
//! per-call contexts from the configured deadline and allows at most one
//! in-flight run per operation type. Verification is read-only and is not
//! serialized.

use crate::config::Config;
use crate::engine::{BackupEngine, RestoreEngine, RetentionPruner, Verifier};
use crate::model::{
    BackupRecord, PruneReport, RecordFilter, RestoreOutcome, RestoreRequest, VerificationReport,
};
use crate::store::{BlobStore, MetadataStore, TableReader, TableWriter};
use crate::utils::cancel::CallContext;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Operation types guarded against concurrent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FullBackup,
    IncrementalBackup,
    Restore,
    Verify,
    Prune,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::FullBackup => "full backup",
            Operation::IncrementalBackup => "incremental backup",
            Operation::Restore => "restore",
            Operation::Verify => "verify",
            Operation::Prune => "prune",
        })
    }
}

/// Marks an operation as running until dropped.
struct RunGuard<'a> {
    running: &'a DashMap<Operation, DateTime<Utc>>,
    op: Operation,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.op);
    }
}

pub struct BackupService {
    config: Arc<Config>,
    metadata: Arc<dyn MetadataStore>,
    backup: BackupEngine,
    restore: RestoreEngine,
    verifier: Verifier,
    pruner: RetentionPruner,
    running: DashMap<Operation, DateTime<Utc>>,
}

impl BackupService {
    /// Validate `config` and wire the engines to the given stores.
    pub fn new<T>(
        config: Config,
        tables: Arc<T>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self>
    where
        T: TableReader + TableWriter + 'static,
    {
        config.validate()?;
        let config = Arc::new(config);
        let reader: Arc<dyn TableReader> = tables.clone();
        let writer: Arc<dyn TableWriter> = tables;

        Ok(Self {
            backup: BackupEngine::new(config.clone(), reader, blobs.clone(), metadata.clone()),
            restore: RestoreEngine::new(config.clone(), writer, blobs.clone(), metadata.clone()),
            verifier: Verifier::new(config.clone(), blobs.clone(), metadata.clone()),
            pruner: RetentionPruner::new(config.clone(), blobs, metadata.clone()),
            running: DashMap::new(),
            config,
            metadata,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Context with the configured per-call deadline and a fresh token.
    pub fn call_context(&self) -> CallContext {
        self.call_context_with(CancellationToken::new())
    }

    pub fn call_context_with(&self, cancel: CancellationToken) -> CallContext {
        CallContext::new(cancel, self.config.call_timeout())
    }

    /// Whether `op` currently has a run in flight
    pub fn is_running(&self, op: Operation) -> bool {
        self.running.contains_key(&op)
    }

    fn begin(&self, op: Operation) -> Result<RunGuard<'_>> {
        match self.running.entry(op) {
            Entry::Occupied(started) => {
                warn!(operation = %op, started = %started.get(), "Operation already running");
                Err(EngineError::AlreadyRunning(op.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(RunGuard {
                    running: &self.running,
                    op,
                })
            }
        }
    }

    pub async fn validate_schema(&self, ctx: &CallContext) -> Result<()> {
        self.backup.validate_schema(ctx).await
    }

    pub async fn create_full_backup(&self, ctx: &CallContext) -> Result<BackupRecord> {
        let _guard = self.begin(Operation::FullBackup)?;
        let record = self.backup.create_full_backup(ctx).await?;
        self.check_new_backup(&record, ctx).await;
        Ok(record)
    }

    pub async fn create_incremental_backup(
        &self,
        since: DateTime<Utc>,
        ctx: &CallContext,
    ) -> Result<BackupRecord> {
        let _guard = self.begin(Operation::IncrementalBackup)?;
        let record = self.backup.create_incremental_backup(since, ctx).await?;
        self.check_new_backup(&record, ctx).await;
        Ok(record)
    }

    /// Incremental backup of everything changed since the start of the most
    /// recent completed backup. Falls back to a full backup when none exists.
    pub async fn create_incremental_since_last(&self, ctx: &CallContext) -> Result<BackupRecord> {
        match self.latest_completed(ctx).await? {
            Some(previous) => {
                info!(previous = %previous.id, since = %previous.timestamp, "Incremental backup since last completed backup");
                self.create_incremental_backup(previous.timestamp, ctx).await
            }
            None => {
                info!("No completed backup yet, running full backup instead");
                self.create_full_backup(ctx).await
            }
        }
    }

    pub async fn restore_from_backup(
        &self,
        request: &RestoreRequest,
        ctx: &CallContext,
    ) -> Result<RestoreOutcome> {
        let _guard = self.begin(Operation::Restore)?;
        self.restore.restore_from_backup(request, ctx).await
    }

    pub async fn verify_backup(&self, backup_id: &str, ctx: &CallContext) -> Result<VerificationReport> {
        let _guard = self.begin(Operation::Verify)?;
        Ok(self.verifier.verify_backup(backup_id, ctx).await)
    }

    pub async fn clean_old_backups(&self, ctx: &CallContext) -> Result<PruneReport> {
        let _guard = self.begin(Operation::Prune)?;
        Ok(self.pruner.clean_old_backups(ctx).await)
    }

    pub async fn list_backups(&self, filter: &RecordFilter, ctx: &CallContext) -> Result<Vec<BackupRecord>> {
        ctx.run("metadata list", self.metadata.list(filter)).await
    }

    pub async fn get_backup(&self, backup_id: &str, ctx: &CallContext) -> Result<Option<BackupRecord>> {
        ctx.run("metadata lookup", self.metadata.get_by_id(backup_id)).await
    }

    async fn latest_completed(&self, ctx: &CallContext) -> Result<Option<BackupRecord>> {
        Ok(self
            .list_backups(&RecordFilter::completed(), ctx)
            .await?
            .into_iter()
            .max_by_key(|r| r.timestamp))
    }

    async fn check_new_backup(&self, record: &BackupRecord, ctx: &CallContext) {
        if !self.config.verify_after_backup {
            return;
        }
        let report = self.verifier.verify_backup(&record.id, ctx).await;
        if !report.valid {
            warn!(backup_id = %record.id, errors = ?report.errors, "New backup failed verification");
        }
    }
}
