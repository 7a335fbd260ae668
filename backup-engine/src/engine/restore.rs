//! Selective restore of a completed backup into the live tables.
//!
//! Lookup, download and the checksum gate are fatal and run before any table
//! is touched. After that each table is restored on its own: a failing table
//! is reported and the remaining tables still run. Tables already restored
//! are not rolled back.

use super::load_snapshot;
use crate::config::Config;
use crate::model::{RestoreOutcome, RestoreRequest, Row};
use crate::store::{BlobStore, MetadataStore, TableWriter};
use crate::utils::cancel::CallContext;
use crate::utils::errors::{EngineError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RestoreEngine {
    config: Arc<Config>,
    tables: Arc<dyn TableWriter>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl RestoreEngine {
    pub fn new(
        config: Arc<Config>,
        tables: Arc<dyn TableWriter>,
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

    pub async fn restore_from_backup(
        &self,
        request: &RestoreRequest,
        ctx: &CallContext,
    ) -> Result<RestoreOutcome> {
        info!(
            backup_id = %request.backup_id,
            tables = ?request.tables,
            dry_run = request.dry_run,
            "Starting restore"
        );

        let (record, snapshot) = load_snapshot(
            self.metadata.as_ref(),
            self.blobs.as_ref(),
            self.config.blob_prefix(),
            &request.backup_id,
            ctx,
        )
        .await
        .inspect_err(|e| warn!(backup_id = %request.backup_id, error = %e, "Restore aborted"))?;

        let targets: Vec<String> = match &request.tables {
            Some(requested) => {
                let mut seen = HashSet::new();
                requested
                    .iter()
                    .filter(|t| seen.insert(t.as_str()))
                    .cloned()
                    .collect()
            }
            None => snapshot.keys().cloned().collect(),
        };

        let mut outcome = RestoreOutcome {
            dry_run: request.dry_run,
            ..Default::default()
        };

        for (idx, table) in targets.iter().enumerate() {
            if ctx.is_cancelled() {
                for skipped in &targets[idx..] {
                    outcome
                        .errors
                        .push(format!("Table {skipped}: skipped, restore cancelled"));
                }
                break;
            }

            let Some(rows) = snapshot.get(table) else {
                warn!(backup_id = %record.id, table = %table, "Table not found in backup");
                outcome.errors.push(format!("Table {table} not found in backup"));
                continue;
            };

            if request.dry_run {
                info!(table = %table, rows = rows.len(), "Dry run: table would be restored");
                outcome.restored_tables.push(table.clone());
                outcome.row_counts.insert(table.clone(), rows.len());
                continue;
            }

            match self.restore_table(table, rows, ctx).await {
                Ok(()) => {
                    info!(table = %table, rows = rows.len(), "Table restored");
                    outcome.restored_tables.push(table.clone());
                    outcome.row_counts.insert(table.clone(), rows.len());
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Table restore failed");
                    outcome.errors.push(table_error(table, &e));
                }
            }
        }

        outcome.success = outcome.errors.is_empty();

        info!(
            backup_id = %record.id,
            backup_type = %record.backup_type,
            success = outcome.success,
            dry_run = outcome.dry_run,
            restored = ?outcome.restored_tables,
            errors = outcome.errors.len(),
            "Restore finished"
        );
        Ok(outcome)
    }

    async fn restore_table(&self, table: &str, rows: &[Row], ctx: &CallContext) -> Result<()> {
        ctx.run(&format!("delete of table {table}"), self.tables.delete_all_rows(table))
            .await?;
        ctx.run(&format!("insert into table {table}"), self.tables.bulk_insert(table, rows))
            .await
    }
}

fn table_error(table: &str, error: &EngineError) -> String {
    match error {
        EngineError::Table { message, .. } => format!("Table {table}: {message}"),
        other => format!("Table {table}: {other}"),
    }
}
