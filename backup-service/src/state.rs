use crate::config::AppConfig;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::stores::{SqliteMetadataStore, SqliteTables};
use backup_engine::store::fs::FsBlobStore;
use backup_engine::utils::cancel::CallContext;
use backup_engine::{BackupService, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<BackupService>,
    pub tables_db: DbPool,
    pub metadata_db: DbPool,
    /// Cancelled on shutdown; every call context is a child of it.
    pub cancel: CancellationToken,
}

impl AppState {
    /// Open both databases, migrate the metadata schema and wire the engine.
    pub fn build(config: AppConfig, engine: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.blob_dir)?;

        let metadata_db = create_pool(&config.metadata_db_path)?;
        migrate(&metadata_db)?;
        let tables_db = create_pool(&config.database_path)?;

        let service = BackupService::new(
            engine,
            Arc::new(SqliteTables::new(tables_db.clone())),
            Arc::new(FsBlobStore::new(&config.blob_dir)),
            Arc::new(SqliteMetadataStore::new(metadata_db.clone())),
        )?;

        Ok(Self {
            config,
            service: Arc::new(service),
            tables_db,
            metadata_db,
            cancel: CancellationToken::new(),
        })
    }

    pub fn call_context(&self) -> CallContext {
        self.service.call_context_with(self.cancel.child_token())
    }

    /// Stop in-flight store calls. Pooled connections close when the state
    /// is dropped; with a rollback journal there is nothing left to flush.
    pub fn close(&self) {
        self.cancel.cancel();
        tracing::info!(
            tables_connections = self.tables_db.state().connections,
            metadata_connections = self.metadata_db.state().connections,
            "Closing databases"
        );
    }
}
