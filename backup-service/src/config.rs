use std::path::PathBuf;

/// Paths and schedules for the service process. Engine settings (tables,
/// retention, compression) live in the TOML file at `config_file`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub metadata_db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub log_level: Option<String>,
    pub full_backup_cron: String,
    pub incremental_backup_cron: String,
    pub prune_cron: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| get(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let data_dir = path("DATA_DIR").unwrap_or_else(|| PathBuf::from("./data"));

        Self {
            config_file: path("CONFIG_FILE").unwrap_or_else(|| data_dir.join("backup.toml")),
            database_path: path("DATABASE_PATH").unwrap_or_else(|| data_dir.join("app.db")),
            metadata_db_path: path("METADATA_DB_PATH")
                .unwrap_or_else(|| data_dir.join("backup-metadata.db")),
            blob_dir: path("BLOB_DIR").unwrap_or_else(|| data_dir.join("blobs")),
            data_dir,
            log_level: get("LOG_LEVEL").filter(|v| !v.is_empty()),
            // Six-field expressions, seconds first.
            full_backup_cron: get("FULL_BACKUP_CRON").unwrap_or_else(|| "0 0 2 * * *".into()),
            incremental_backup_cron: get("INCREMENTAL_BACKUP_CRON")
                .unwrap_or_else(|| "0 0 */4 * * *".into()),
            prune_cron: get("PRUNE_CRON").unwrap_or_else(|| "0 30 3 * * *".into()),
        }
    }
}
