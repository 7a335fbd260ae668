//! Shared fixture for engine tests: three HR tables in memory stores.

use super::{load_snapshot, BackupEngine, RestoreEngine, RetentionPruner, Verifier};
use crate::config::Config;
use crate::model::value::row;
use crate::model::{BackupRecord, RecordFilter, Row, Snapshot, Value};
use crate::store::MetadataStore;
use crate::store::memory::{MemoryBlobStore, MemoryMetadataStore, MemoryTables};
use crate::utils::cancel::CallContext;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn person(id: i64, name: &str, updated: DateTime<Utc>) -> Row {
    row([
        ("id", Value::Int(id)),
        ("name", Value::from(name)),
        ("active", Value::Bool(true)),
        ("updated_at", Value::from(updated)),
    ])
}

pub fn employees() -> Vec<Row> {
    vec![
        person(1, "Ada", ts(2024, 1, 10)),
        person(2, "Grace", ts(2024, 3, 5)),
        person(3, "Linus", ts(2024, 6, 15)),
    ]
}

pub fn departments() -> Vec<Row> {
    vec![
        row([
            ("id", Value::Int(10)),
            ("title", Value::from("Engineering")),
            ("budget", Value::Float(1.5e6)),
            ("updated_at", Value::from(ts(2024, 2, 1))),
        ]),
        row([
            ("id", Value::Int(11)),
            ("title", Value::from("People Ops")),
            ("budget", Value::Null),
            ("updated_at", Value::from(ts(2024, 5, 20))),
        ]),
    ]
}

pub fn leave_requests() -> Vec<Row> {
    vec![
        row([
            ("id", Value::Int(100)),
            ("employee_id", Value::Int(1)),
            ("updated_at", Value::from(ts(2024, 6, 2))),
        ]),
        row([
            ("id", Value::Int(101)),
            ("employee_id", Value::Int(3)),
            ("updated_at", Value::from(ts(2024, 6, 20))),
        ]),
    ]
}

pub struct Harness {
    pub config: Arc<Config>,
    pub tables: Arc<MemoryTables>,
    pub blobs: Arc<MemoryBlobStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub backup: BackupEngine,
    pub restore: RestoreEngine,
    pub verifier: Verifier,
    pub pruner: RetentionPruner,
    pub ctx: CallContext,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::with_tables(["employees", "departments", "leave_requests"]);
        tweak(&mut config);
        let config = Arc::new(config);

        let tables = Arc::new(MemoryTables::new());
        tables.set_rows("employees", employees()).await;
        tables.set_rows("departments", departments()).await;
        tables.set_rows("leave_requests", leave_requests()).await;

        let blobs = Arc::new(MemoryBlobStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());

        Self {
            backup: BackupEngine::new(config.clone(), tables.clone(), blobs.clone(), metadata.clone()),
            restore: RestoreEngine::new(config.clone(), tables.clone(), blobs.clone(), metadata.clone()),
            verifier: Verifier::new(config.clone(), blobs.clone(), metadata.clone()),
            pruner: RetentionPruner::new(config.clone(), blobs.clone(), metadata.clone()),
            ctx: CallContext::default(),
            config,
            tables,
            blobs,
            metadata,
        }
    }

    /// Decode a stored backup through the same gate restore uses.
    pub async fn load(&self, backup_id: &str) -> (BackupRecord, Snapshot) {
        load_snapshot(
            self.metadata.as_ref(),
            self.blobs.as_ref(),
            self.config.blob_prefix(),
            backup_id,
            &self.ctx,
        )
        .await
        .unwrap()
    }

    /// Ids of all stored records, oldest first.
    pub async fn metadata_ids(&self) -> Vec<String> {
        self.metadata
            .list(&RecordFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    pub fn key(&self, record: &BackupRecord) -> String {
        super::blob_key(self.config.blob_prefix(), record).unwrap()
    }
}
