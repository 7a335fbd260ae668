//! Application tables read and rewritten through SQLite.
//!
//! SQLite has no native boolean or timestamp type: booleans are written as
//! integers and timestamps as RFC 3339 text, so they come back as `Int` and
//! `String`. The change column is compared in Rust and may hold either
//! RFC 3339 text or SQLite's own `YYYY-MM-DD HH:MM:SS` form.

use crate::db::connection::DbPool;
use async_trait::async_trait;
use backup_engine::config::is_identifier;
use backup_engine::model::{Row, Value};
use backup_engine::store::{ChangedSince, TableReader, TableWriter};
use backup_engine::{EngineError, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

pub struct SqliteTables {
    pool: DbPool,
}

impl SqliteTables {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, table: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        if !is_identifier(table) {
            return Err(EngineError::table(table, "invalid table name"));
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::table(table, format!("task failed: {e}")))?
        .map_err(|e| EngineError::table(table, format!("{e:#}")))
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn from_sql(table: &str, column: &str, value: ValueRef<'_>) -> anyhow::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8(bytes.to_vec())?),
        ValueRef::Blob(_) => anyhow::bail!("column {table}.{column} holds binary data"),
    })
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

fn changed_at(value: &Value) -> Option<DateTime<Utc>> {
    value.as_timestamp().or_else(|| match value {
        Value::String(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc()),
        _ => None,
    })
}

fn read_rows(conn: &Connection, table: &str) -> anyhow::Result<Vec<Row>> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote(table)))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut mapped = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            mapped.insert(column.clone(), from_sql(table, column, row.get_ref(idx)?)?);
        }
        out.push(mapped);
    }
    Ok(out)
}

fn column_names(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if names.is_empty() {
        anyhow::bail!("no such table");
    }
    Ok(names)
}

#[async_trait]
impl TableReader for SqliteTables {
    async fn read_table(&self, table: &str, since: Option<ChangedSince<'_>>) -> Result<Vec<Row>> {
        let name = table.to_string();
        let rows = self
            .with_conn(table, move |conn| read_rows(conn, &name))
            .await?;

        Ok(match since {
            None => rows,
            Some(filter) => rows
                .into_iter()
                .filter(|row| {
                    row.get(filter.column)
                        .and_then(changed_at)
                        .is_some_and(|ts| ts >= filter.at)
                })
                .collect(),
        })
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let name = table.to_string();
        let column = column.to_string();
        self.with_conn(table, move |conn| {
            Ok(column_names(conn, &name)?.contains(&column))
        })
        .await
    }
}

#[async_trait]
impl TableWriter for SqliteTables {
    async fn delete_all_rows(&self, table: &str) -> Result<()> {
        let name = table.to_string();
        self.with_conn(table, move |conn| {
            conn.execute(&format!("DELETE FROM {}", quote(&name)), [])?;
            Ok(())
        })
        .await
    }

    /// All rows go in one transaction, so a failing row leaves the table as
    /// it was before the call.
    async fn bulk_insert(&self, table: &str, rows: &[Row]) -> Result<()> {
        let name = table.to_string();
        let rows = rows.to_vec();
        self.with_conn(table, move |conn| {
            let tx = conn.unchecked_transaction()?;
            for row in &rows {
                if let Some(bad) = row.keys().find(|c| !is_identifier(c)) {
                    anyhow::bail!("invalid column name: {bad:?}");
                }
                let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
                let placeholders = vec!["?"; columns.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(&name),
                    columns.join(", "),
                    placeholders
                );
                let mut stmt = tx.prepare_cached(&sql)?;
                stmt.execute(params_from_iter(row.values().map(to_sql)))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
