//! Full-state export of a store and loading it into another.
//!
//! An export is a logical dump: every schema object's DDL in creation order
//! plus every row of every table. It is captured inside one read transaction
//! so it reflects a single committed state, and carries a blake3 checksum so
//! a corrupted export is rejected before anything is loaded.

use crate::{
    error::{Error, Result},
    value::Value,
};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the export format for future compatibility.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// SQLite's internal AUTOINCREMENT bookkeeping table.
const SEQUENCE_TABLE: &str = "sqlite_sequence";

/// One entry of the store's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObject {
    /// `table`, `index`, `trigger` or `view`
    pub kind: String,
    pub name: String,
    /// Table the object belongs to
    pub table: String,
    /// DDL that recreates the object
    pub sql: String,
}

impl SchemaObject {
    fn is_table(&self) -> bool {
        self.kind == "table"
    }
}

/// Column names and rows of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A point-in-time, self-contained copy of a store's full state.
///
/// Uses BTreeMap for deterministic serialization and checksum order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateExport {
    /// Export format version
    pub format_version: u32,
    /// When the read transaction was opened
    pub captured_at: DateTime<Utc>,
    /// Schema objects in creation order
    pub schema: Vec<SchemaObject>,
    /// Row data keyed by table name
    pub tables: BTreeMap<String, TableData>,
    /// Hex blake3 digest of schema and rows
    pub checksum: String,
}

impl StateExport {
    /// Capture the full state visible through `conn`.
    ///
    /// Refuses while the connection has an open transaction, since the
    /// export would otherwise include uncommitted writes.
    pub fn capture(conn: &mut Connection) -> Result<Self> {
        if !conn.is_autocommit() {
            return Err(Error::ExportInconsistent(
                "connection has an open transaction".into(),
            ));
        }

        let captured_at = Utc::now();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(|e| Error::from_sqlite(e, "BEGIN DEFERRED"))?;

        let schema = read_schema(&tx)?;
        let mut tables = BTreeMap::new();
        for object in schema.iter().filter(|o| o.is_table()) {
            tables.insert(object.name.clone(), read_table(&tx, &object.name)?);
        }
        if has_sequence_table(&tx)? {
            tables.insert(SEQUENCE_TABLE.to_string(), read_table(&tx, SEQUENCE_TABLE)?);
        }

        // Read-only; finishing releases the read snapshot.
        tx.finish().map_err(|e| Error::from_sqlite(e, "COMMIT"))?;

        let checksum = compute_checksum(&schema, &tables);
        let export = Self {
            format_version: EXPORT_FORMAT_VERSION,
            captured_at,
            schema,
            tables,
            checksum,
        };

        tracing::debug!(
            tables = export.tables.len(),
            rows = export.row_count(),
            "Captured state export"
        );
        Ok(export)
    }

    /// Load this export into an empty connection.
    ///
    /// Tables are created first, then filled, then indexes, triggers and
    /// views are created, all inside one transaction. Foreign key
    /// enforcement is switched off for the load and left off; callers
    /// re-enable it as configured.
    pub fn load_into(&self, conn: &mut Connection) -> Result<()> {
        self.verify()?;

        let load_err = |e: rusqlite::Error| Error::ReplicaLoadFailed(e.to_string());

        conn.pragma_update(None, "foreign_keys", false)
            .map_err(load_err)?;
        let tx = conn.transaction().map_err(load_err)?;

        for object in self.schema.iter().filter(|o| o.is_table()) {
            tx.execute_batch(&object.sql).map_err(load_err)?;
        }

        for (name, data) in &self.tables {
            if data.rows.is_empty() {
                continue;
            }
            if name == SEQUENCE_TABLE {
                tx.execute_batch("DELETE FROM sqlite_sequence")
                    .map_err(load_err)?;
            }
            let sql = insert_sql(name, &data.columns);
            let mut stmt = tx.prepare(&sql).map_err(load_err)?;
            for row in &data.rows {
                stmt.execute(params_from_iter(row.iter()))
                    .map_err(load_err)?;
            }
        }

        for object in self.schema.iter().filter(|o| !o.is_table()) {
            tx.execute_batch(&object.sql).map_err(load_err)?;
        }

        tx.commit().map_err(load_err)?;

        tracing::debug!(
            tables = self.tables.len(),
            rows = self.row_count(),
            "Loaded state export"
        );
        Ok(())
    }

    /// Check the format version and checksum.
    pub fn verify(&self) -> Result<()> {
        if self.format_version > EXPORT_FORMAT_VERSION {
            return Err(Error::InvalidExport(format!(
                "unsupported export format version: {} (max supported: {})",
                self.format_version, EXPORT_FORMAT_VERSION
            )));
        }

        let actual = compute_checksum(&self.schema, &self.tables);
        if actual != self.checksum {
            return Err(Error::InvalidExport(format!(
                "checksum mismatch: expected {}, computed {}",
                self.checksum, actual
            )));
        }
        Ok(())
    }

    /// Total rows across all user tables.
    pub fn row_count(&self) -> usize {
        self.tables
            .iter()
            .filter(|(name, _)| name.as_str() != SEQUENCE_TABLE)
            .map(|(_, data)| data.rows.len())
            .sum()
    }

    /// Names of the user tables in the export.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.schema
            .iter()
            .filter(|o| o.is_table())
            .map(|o| o.name.as_str())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidExport(e.to_string()))
    }

    /// Deserialize from JSON, checking version and checksum.
    pub fn from_json(json: &str) -> Result<Self> {
        let export: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidExport(e.to_string()))?;
        export.verify()?;
        Ok(export)
    }
}

/// Metadata about an export (without the data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub format_version: u32,
    pub captured_at: DateTime<Utc>,
    pub table_count: usize,
    pub row_count: usize,
    pub checksum: String,
}

impl From<&StateExport> for ExportMetadata {
    fn from(export: &StateExport) -> Self {
        Self {
            format_version: export.format_version,
            captured_at: export.captured_at,
            table_count: export.table_names().count(),
            row_count: export.row_count(),
            checksum: export.checksum.clone(),
        }
    }
}

fn read_schema(conn: &Connection) -> Result<Vec<SchemaObject>> {
    let sql = "SELECT type, name, tbl_name, sql FROM sqlite_master \
               WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
               ORDER BY rowid";
    let mut stmt = conn.prepare(sql).map_err(|e| Error::from_sqlite(e, sql))?;
    let objects = stmt
        .query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                table: row.get(2)?,
                sql: row.get(3)?,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| Error::from_sqlite(e, sql))?;
    Ok(objects)
}

fn read_table(conn: &Connection, name: &str) -> Result<TableData> {
    let columns = stored_columns(conn, name)?;
    let sql = format!(
        "SELECT {} FROM {}",
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        quote_ident(name)
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| Error::from_sqlite(e, &sql))?;

    let mut rows = stmt.query([]).map_err(|e| Error::from_sqlite(e, &sql))?;
    let mut data = Vec::new();
    while let Some(row) = rows.next().map_err(|e| Error::from_sqlite(e, &sql))? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = row.get_ref(i).map_err(|e| Error::from_sqlite(e, &sql))?;
            values.push(Value::from(value));
        }
        data.push(values);
    }

    Ok(TableData {
        columns,
        rows: data,
    })
}

/// Columns that hold stored values, in declaration order. Generated and
/// hidden columns (`hidden != 0`) are rebuilt by SQLite and cannot be
/// inserted into.
fn stored_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = "SELECT name FROM pragma_table_xinfo(?1) WHERE hidden = 0 ORDER BY cid";
    let mut stmt = conn.prepare(sql).map_err(|e| Error::from_sqlite(e, sql))?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| Error::from_sqlite(e, sql))?;
    if columns.is_empty() {
        return Err(Error::ExportInconsistent(format!(
            "table {table} has no stored columns"
        )));
    }
    Ok(columns)
}

fn has_sequence_table(conn: &Connection) -> Result<bool> {
    let sql = "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'";
    let count: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(|e| Error::from_sqlite(e, sql))?;
    Ok(count > 0)
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES ({placeholders})",
        quote_ident(table)
    )
}

/// Quote an identifier for use in generated SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn compute_checksum(schema: &[SchemaObject], tables: &BTreeMap<String, TableData>) -> String {
    fn update_str(hasher: &mut blake3::Hasher, s: &str) {
        hasher.update(&(s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(&(schema.len() as u64).to_le_bytes());
    for object in schema {
        update_str(&mut hasher, &object.kind);
        update_str(&mut hasher, &object.name);
        update_str(&mut hasher, &object.table);
        update_str(&mut hasher, &object.sql);
    }

    hasher.update(&(tables.len() as u64).to_le_bytes());
    for (name, data) in tables {
        update_str(&mut hasher, name);
        hasher.update(&(data.columns.len() as u64).to_le_bytes());
        for column in &data.columns {
            update_str(&mut hasher, column);
        }
        hasher.update(&(data.rows.len() as u64).to_le_bytes());
        for row in &data.rows {
            for value in row {
                value.hash_into(&mut hasher);
            }
        }
    }

    hasher.finalize().to_hex().to_string()
}
