use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_records (
  id TEXT PRIMARY KEY,
  backup_type TEXT NOT NULL CHECK(backup_type IN ('full','incremental')),
  timestamp TEXT NOT NULL,
  schema_version TEXT NOT NULL,
  tables TEXT NOT NULL DEFAULT '[]',
  size_bytes INTEGER NOT NULL DEFAULT 0,
  compression TEXT NOT NULL,
  checksum TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL CHECK(status IN ('pending','completed','failed')),
  error TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_backup_records_timestamp ON backup_records(timestamp);
CREATE INDEX IF NOT EXISTS idx_backup_records_status ON backup_records(status);
"#;

/// Create the metadata schema. Safe to run on every start.
pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Migrating backup metadata schema");
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    tracing::info!("[DB] Migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("meta.db")).unwrap();

        migrate(&pool).unwrap();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM backup_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
