//! Backup records kept in a SQLite table.

use crate::db::connection::DbPool;
use crate::models::backup_record;
use async_trait::async_trait;
use backup_engine::model::RecordFilter;
use backup_engine::store::MetadataStore;
use backup_engine::{BackupRecord, EngineError, Result};
use rusqlite::Connection;

pub struct SqliteMetadataStore {
    pool: DbPool,
}

impl SqliteMetadataStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::Metadata(format!("metadata task failed: {e}")))?
        .map_err(|e| EngineError::Metadata(format!("{e:#}")))
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &BackupRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| backup_record::insert(conn, &record))
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| backup_record::find_by_id(conn, &id))
            .await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<BackupRecord>> {
        let filter = filter.clone();
        self.with_conn(move |conn| backup_record::find_all(conn, &filter))
            .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| backup_record::delete_by_id(conn, &id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use backup_engine::{BackupStatus, BackupType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn store(dir: &tempfile::TempDir) -> SqliteMetadataStore {
        let pool = create_pool(&dir.path().join("meta.db")).unwrap();
        migrate(&pool).unwrap();
        SqliteMetadataStore::new(pool)
    }

    fn record(backup_type: BackupType, at: DateTime<Utc>, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            id: BackupRecord::make_id(backup_type, at),
            backup_type,
            timestamp: at,
            schema_version: "1.0".into(),
            tables: vec!["employees".into(), "departments".into()],
            size_bytes: 2048,
            compression: "gzip".into(),
            checksum: "ab".repeat(32),
            status,
            error: (status == BackupStatus::Failed).then(|| "Table employees: locked".to_string()),
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap() + Duration::nanoseconds(123_456_789);
        let original = record(BackupType::Full, at, BackupStatus::Failed);

        store.insert(&original).await.unwrap();
        let loaded = store.get_by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded, original);

        assert!(store.get_by_id("full-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let original = record(BackupType::Full, at, BackupStatus::Completed);

        store.insert(&original).await.unwrap();
        let err = store.insert(&original).await.unwrap_err();
        assert!(matches!(err, EngineError::Metadata(_)));
    }

    #[tokio::test]
    async fn test_list_orders_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let day = |d| Utc.with_ymd_and_hms(2024, 6, d, 2, 0, 0).unwrap();

        // Inserted out of order on purpose.
        store.insert(&record(BackupType::Incremental, day(3), BackupStatus::Completed)).await.unwrap();
        store.insert(&record(BackupType::Full, day(1), BackupStatus::Completed)).await.unwrap();
        store.insert(&record(BackupType::Full, day(2), BackupStatus::Failed)).await.unwrap();

        let all = store.list(&RecordFilter::default()).await.unwrap();
        let stamps: Vec<_> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![day(1), day(2), day(3)]);

        let completed = store.list(&RecordFilter::completed()).await.unwrap();
        assert_eq!(completed.len(), 2);

        let older = store.list(&RecordFilter::older_than(day(3))).await.unwrap();
        assert_eq!(older.len(), 2);

        let filter = RecordFilter {
            after: Some(day(2)),
            backup_type: Some(BackupType::Full),
            ..Default::default()
        };
        let matched = store.list(&filter).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].status, BackupStatus::Failed);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let original = record(BackupType::Full, at, BackupStatus::Completed);
        store.insert(&original).await.unwrap();

        assert!(store.delete_by_id(&original.id).await.unwrap());
        assert!(!store.delete_by_id(&original.id).await.unwrap());
        assert!(store.list(&RecordFilter::default()).await.unwrap().is_empty());
    }
}
