//! Local filesystem blob store.
//!
//! Keys map to paths below a root directory (`backups/full-1.json.gz` →
//! `<root>/backups/full-1.json.gz`). Writes go to a temporary sibling file
//! and are renamed into place so a reader never sees a partial object.

use super::BlobStore;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key below the root, rejecting anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(EngineError::Blob(format!("invalid blob key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key, content_type, bytes = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EngineError::BlobNotFound(key.to_string()))
            }
            Err(e) => Err(EngineError::Blob(format!("{key}: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EngineError::BlobNotFound(key.to_string()))
            }
            Err(e) => Err(EngineError::Blob(format!("{key}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("backups/full-1.json.gz", Bytes::from_static(b"payload"), "application/gzip")
            .await
            .unwrap();
        assert!(dir.path().join("backups/full-1.json.gz").exists());
        assert!(!dir.path().join("backups/full-1.json.gz.partial").exists());

        let data = store.get("backups/full-1.json.gz").await.unwrap();
        assert_eq!(&data[..], b"payload");

        store.delete("backups/full-1.json.gz").await.unwrap();
        assert!(matches!(
            store.get("backups/full-1.json.gz").await,
            Err(EngineError::BlobNotFound(_))
        ));
        assert!(matches!(
            store.delete("backups/full-1.json.gz").await,
            Err(EngineError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        for key in ["../outside", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(store.get(key).await, Err(EngineError::Blob(_))),
                "key {key:?} was accepted"
            );
        }
    }
}
