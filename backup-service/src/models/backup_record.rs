use backup_engine::model::RecordFilter;
use backup_engine::{BackupRecord, BackupStatus, BackupType};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, Row};

/// Fixed-width UTC text, so string order is time order.
fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    let backup_type: String = row.get("backup_type")?;
    let timestamp: String = row.get("timestamp")?;
    let tables: String = row.get("tables")?;
    let status: String = row.get("status")?;
    let size_bytes: i64 = row.get("size_bytes")?;

    Ok(BackupRecord {
        id: row.get("id")?,
        backup_type: backup_type
            .parse::<BackupType>()
            .map_err(|e| conversion_error(1, e))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| conversion_error(2, e))?
            .with_timezone(&Utc),
        schema_version: row.get("schema_version")?,
        tables: serde_json::from_str(&tables).map_err(|e| conversion_error(4, e))?,
        size_bytes: size_bytes.max(0) as u64,
        compression: row.get("compression")?,
        checksum: row.get("checksum")?,
        status: status
            .parse::<BackupStatus>()
            .map_err(|e| conversion_error(8, e))?,
        error: row.get("error")?,
    })
}

pub fn insert(conn: &Connection, record: &BackupRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO backup_records (id, backup_type, timestamp, schema_version, tables, size_bytes, compression, checksum, status, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.backup_type.as_str(),
            ts_to_sql(&record.timestamp),
            record.schema_version,
            serde_json::to_string(&record.tables)?,
            i64::try_from(record.size_bytes)?,
            record.compression,
            record.checksum,
            record.status.as_str(),
            record.error,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().transpose()?)
}

/// Matching records, oldest first. Unreadable rows fail the whole query.
pub fn find_all(conn: &Connection, filter: &RecordFilter) -> anyhow::Result<Vec<BackupRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(before) = &filter.before {
        clauses.push("timestamp < ?");
        values.push(Box::new(ts_to_sql(before)));
    }
    if let Some(after) = &filter.after {
        clauses.push("timestamp >= ?");
        values.push(Box::new(ts_to_sql(after)));
    }
    if let Some(backup_type) = filter.backup_type {
        clauses.push("backup_type = ?");
        values.push(Box::new(backup_type.as_str()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status.as_str()));
    }

    let mut sql = String::from("SELECT * FROM backup_records");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY timestamp ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(params.as_slice(), row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn delete_by_id(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM backup_records WHERE id = ?", params![id])?;
    Ok(changed > 0)
}
