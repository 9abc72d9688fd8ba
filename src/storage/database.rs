use crate::domain::model::{Row, Value};
use crate::storage::schema::{quote_ident, TableSchema};
use crate::utils::error::{IngestError, Result};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::path::Path;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::Owned((*i).into()),
            Value::Float(f) if f.is_nan() => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Float(f) => ToSqlOutput::Owned((*f).into()),
            Value::Text(s) | Value::Geometry(s) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            Value::Timestamp(ts) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(ts.to_rfc3339()))
            }
        })
    }
}

/// Relational store for canonical batches plus the ingestion ledger.
///
/// The connection is opened once per ingestion run and released when the
/// store is dropped or explicitly closed.
pub struct DataStore {
    conn: Connection,
}

impl DataStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the per-dataset ledger table if absent.
    pub fn ensure_metadata_table(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dataset_metadata (
                dataset_id TEXT PRIMARY KEY,
                dataset_name TEXT,
                table_name TEXT,
                last_ingestion TEXT,
                record_count INTEGER,
                status TEXT
            )",
        )?;
        Ok(())
    }

    /// Create the target table and its indexes if they do not exist.
    /// Safe to call repeatedly against an already-provisioned schema.
    pub fn provision(&self, schema: &TableSchema) -> Result<()> {
        schema.check_references()?;
        tracing::info!("Provisioning table {}", schema.table_name);
        self.conn.execute(&schema.create_table_sql(), [])?;
        for index_sql in schema.create_index_sql() {
            self.conn.execute(&index_sql, [])?;
        }
        Ok(())
    }

    /// Insert every row as a new record. Only for datasets that declare
    /// no unique key.
    pub fn append(&mut self, schema: &TableSchema, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = write_columns(schema, rows);
        let sql = insert_sql(schema, &columns, None);
        self.execute_batch_write(&sql, &columns, rows)
    }

    /// Batched insert that overwrites every non-key column on a conflict
    /// against the declared unique key. When the key covers all written
    /// columns the conflict becomes a no-op. One transaction per batch;
    /// the conflict clause makes each row write atomic, no read precedes
    /// the write.
    pub fn upsert(
        &mut self,
        schema: &TableSchema,
        rows: &[Row],
        unique_keys: &[String],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        if unique_keys.is_empty() {
            return Err(IngestError::Schema {
                table: schema.table_name.clone(),
                message: "upsert requires at least one unique key column".to_string(),
            });
        }
        if !schema.has_unique_on(unique_keys) {
            return Err(IngestError::Schema {
                table: schema.table_name.clone(),
                message: format!(
                    "unique keys {:?} do not match a declared uniqueness constraint",
                    unique_keys
                ),
            });
        }
        let columns = write_columns(schema, rows);
        let sql = insert_sql(schema, &columns, Some(unique_keys));
        self.execute_batch_write(&sql, &columns, rows)
    }

    fn execute_batch_write(&mut self, sql: &str, columns: &[String], rows: &[Row]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(sql)?;
            for row in rows {
                let params: Vec<&Value> = columns
                    .iter()
                    .map(|col| row.get(col).unwrap_or(&Value::Null))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(params))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Upsert one ledger row for the dataset, same conflict discipline as
    /// batch writes.
    pub fn update_metadata(
        &self,
        dataset_id: &str,
        dataset_name: &str,
        table_name: &str,
        record_count: usize,
        status: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dataset_metadata
                (dataset_id, dataset_name, table_name, last_ingestion, record_count, status)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP, ?4, ?5)
             ON CONFLICT(dataset_id) DO UPDATE SET
                dataset_name = excluded.dataset_name,
                table_name = excluded.table_name,
                last_ingestion = excluded.last_ingestion,
                record_count = excluded.record_count,
                status = excluded.status",
            rusqlite::params![dataset_id, dataset_name, table_name, record_count as i64, status],
        )?;
        Ok(())
    }

    /// Escape hatch for smoke checks: run a query returning one scalar.
    pub fn query_scalar<T: rusqlite::types::FromSql>(&self, sql: &str) -> Result<T> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| IngestError::from(e))
    }
}

/// Schema columns actually present in the batch, in schema order.
/// Auto-populated columns (serial keys, defaulted timestamps) stay out of
/// the DML when the transform did not emit them.
fn write_columns(schema: &TableSchema, rows: &[Row]) -> Vec<String> {
    schema
        .columns
        .iter()
        .filter(|col| rows[0].contains(&col.name))
        .map(|col| col.name.clone())
        .collect()
}

fn insert_sql(schema: &TableSchema, columns: &[String], conflict_keys: Option<&[String]>) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&schema.table_name),
        col_list.join(", "),
        placeholders.join(", ")
    );

    if let Some(keys) = conflict_keys {
        let key_list: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
        let updates: Vec<String> = columns
            .iter()
            .filter(|col| !keys.contains(col))
            .map(|col| format!("{0} = excluded.{0}", quote_ident(col)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", key_list.join(", ")));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT({}) DO UPDATE SET {}",
                key_list.join(", "),
                updates.join(", ")
            ));
        }
    }
    sql
}
