//! Backup, restore, verification and retention pipelines.
//!
//! Each engine is stateless: every call re-reads the metadata and blob
//! stores, and all store access goes through a [`CallContext`] so the caller
//! can cancel or bound it.

pub mod backup;
pub mod restore;
pub mod retention;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::BackupEngine;
pub use restore::RestoreEngine;
pub use retention::{RetentionDecision, RetentionPolicy, RetentionPruner};
pub use verify::Verifier;

use crate::codec::{self, CompressionAlgorithm};
use crate::model::value::decode_snapshot;
use crate::model::{BackupRecord, Snapshot};
use crate::store::{BlobStore, MetadataStore};
use crate::utils::cancel::CallContext;
use crate::utils::errors::{EngineError, Result};
use tracing::debug;

/// Blob key for a record, derived from its id and its own compression tag.
pub fn blob_key(prefix: &str, record: &BackupRecord) -> Result<String> {
    let algorithm: CompressionAlgorithm = record.compression.parse()?;
    Ok(BackupRecord::blob_key_for(prefix, &record.id, algorithm.extension()))
}

/// Look up, download, checksum-gate and decode a completed backup.
///
/// Nothing is decompressed or parsed unless the downloaded bytes match the
/// recorded checksum.
pub(crate) async fn load_snapshot(
    metadata: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    prefix: &str,
    backup_id: &str,
    ctx: &CallContext,
) -> Result<(BackupRecord, Snapshot)> {
    let record = ctx
        .run("metadata lookup", metadata.get_by_id(backup_id))
        .await?
        .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))?;

    if !record.is_completed() {
        return Err(EngineError::BackupNotRestorable {
            id: record.id.clone(),
            status: record.status.to_string(),
        });
    }

    let algorithm: CompressionAlgorithm = record.compression.parse()?;
    let key = BackupRecord::blob_key_for(prefix, &record.id, algorithm.extension());

    let data = ctx
        .run("blob download", blobs.get(&key))
        .await
        .map_err(|e| match e {
            EngineError::BlobNotFound(_)
            | EngineError::Cancelled(_)
            | EngineError::Timeout { .. } => e,
            other => EngineError::DownloadFailed {
                key: key.clone(),
                message: other.to_string(),
            },
        })?;

    codec::verify_checksum(&data, &record.checksum)?;
    debug!(backup_id, key = %key, bytes = data.len(), "Checksum verified");

    let snapshot = tokio::task::spawn_blocking(move || -> Result<Snapshot> {
        let raw = codec::decompress(algorithm, &data)?;
        decode_snapshot(&raw)
    })
    .await
    .map_err(|e| EngineError::Compression(format!("decode task failed: {e}")))??;

    Ok((record, snapshot))
}
