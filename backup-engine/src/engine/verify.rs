//! Read-only integrity check of a stored backup.

use super::load_snapshot;
use crate::config::Config;
use crate::model::VerificationReport;
use crate::store::{BlobStore, MetadataStore};
use crate::utils::cancel::CallContext;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Verifier {
    config: Arc<Config>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Verifier {
    pub fn new(config: Arc<Config>, blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config,
            blobs,
            metadata,
        }
    }

    /// Download, checksum and decode a backup, then check that every table
    /// its record lists is present in the payload. Stops at the first
    /// problem. Never writes anything.
    pub async fn verify_backup(&self, backup_id: &str, ctx: &CallContext) -> VerificationReport {
        let (record, snapshot) = match load_snapshot(
            self.metadata.as_ref(),
            self.blobs.as_ref(),
            self.config.blob_prefix(),
            backup_id,
            ctx,
        )
        .await
        {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(backup_id, error = %e, "Backup verification failed");
                return VerificationReport::invalid(e.to_string());
            }
        };

        if let Some(missing) = record.tables.iter().find(|t| !snapshot.contains_key(*t)) {
            warn!(backup_id, table = %missing, "Listed table missing from payload");
            return VerificationReport::invalid(format!(
                "Table {missing} is listed in backup metadata but missing from the payload"
            ));
        }

        info!(backup_id, tables = record.tables.len(), "Backup verified");
        VerificationReport::valid()
    }
}
