//! In-process store implementations.
//!
//! Used by the engine tests and by callers embedding the engine without a
//! database. Table reads and writes can be made to fail per table.

use super::{BlobStore, ChangedSince, MetadataStore, TableReader, TableWriter};
use crate::model::{BackupRecord, RecordFilter, Row};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

// ── Tables ──

/// Relational store held in memory: table name to rows.
#[derive(Default)]
pub struct MemoryTables {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
    failing_reads: RwLock<HashSet<String>>,
    failing_writes: RwLock<HashSet<String>>,
    deletes: AtomicUsize,
    inserts: AtomicUsize,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.tables.write().await.insert(table.to_string(), rows);
    }

    pub async fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.read().await.get(table).cloned()
    }

    /// Make every read of `table` fail.
    pub async fn fail_reads_for(&self, table: &str) {
        self.failing_reads.write().await.insert(table.to_string());
    }

    /// Make every delete and insert on `table` fail.
    pub async fn fail_writes_for(&self, table: &str) {
        self.failing_writes.write().await.insert(table.to_string());
    }

    /// Number of `delete_all_rows` calls made so far
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Number of `bulk_insert` calls made so far
    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::Relaxed)
    }

    async fn check_writable(&self, table: &str) -> Result<()> {
        if self.failing_writes.read().await.contains(table) {
            return Err(EngineError::table(table, "write rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl TableReader for MemoryTables {
    async fn read_table(&self, table: &str, since: Option<ChangedSince<'_>>) -> Result<Vec<Row>> {
        if self.failing_reads.read().await.contains(table) {
            return Err(EngineError::table(table, "read rejected"));
        }

        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| EngineError::table(table, "no such table"))?;

        Ok(match since {
            None => rows.clone(),
            Some(filter) => rows
                .iter()
                .filter(|row| {
                    row.get(filter.column)
                        .and_then(|v| v.as_timestamp())
                        .is_some_and(|ts| ts >= filter.at)
                })
                .cloned()
                .collect(),
        })
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| EngineError::table(table, "no such table"))?;
        // Schema-less: an empty table is assumed to carry the column.
        Ok(rows.is_empty() || rows.iter().all(|row| row.contains_key(column)))
    }
}

#[async_trait]
impl TableWriter for MemoryTables {
    async fn delete_all_rows(&self, table: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_writable(table).await?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .clear();
        Ok(())
    }

    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.check_writable(table).await?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }
}

// ── Blobs ──

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| EngineError::BlobNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| EngineError::BlobNotFound(key.to_string()))
    }
}

// ── Metadata ──

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<String, BackupRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: &BackupRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(EngineError::Metadata(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<BackupRecord>> {
        let mut matching: Vec<BackupRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}
