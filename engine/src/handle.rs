//! A single SQLite connection and its readiness state.
//!
//! Both the durable store's worker and every optimistic replica own exactly
//! one [`StoreHandle`]; all statement execution goes through here.

use crate::{
    config::DurableConfig,
    error::{Error, Result},
    export::StateExport,
    rows::{Column, RowSet},
    sql::{classify, is_compound, translate_placeholders, Statement},
    value::Value,
};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Initializing,
    Ready,
    Failed,
}

/// An owned connection plus its state.
pub struct StoreHandle {
    conn: Connection,
    state: HandleState,
    foreign_keys: bool,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("state", &self.state)
            .field("autocommit", &self.conn.is_autocommit())
            .finish()
    }
}

impl StoreHandle {
    /// Open the connection described by `config`.
    ///
    /// File-backed databases are switched to WAL. The handle starts out
    /// [`HandleState::Initializing`].
    pub fn open(config: &DurableConfig) -> Result<Self> {
        let unavailable = |e: rusqlite::Error| Error::StoreUnavailable(e.to_string());

        let conn = match &config.path {
            Some(path) => {
                let conn = Connection::open(path).map_err(unavailable)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
                .map_err(unavailable)?;
                conn
            }
            None => Connection::open_in_memory().map_err(unavailable)?,
        };
        conn.busy_timeout(config.busy_timeout)
            .map_err(unavailable)?;

        let mut handle = Self {
            conn,
            state: HandleState::Initializing,
            foreign_keys: config.foreign_keys,
        };
        handle.apply_foreign_keys()?;
        Ok(handle)
    }

    /// Open an empty in-memory handle.
    pub fn open_in_memory(foreign_keys: bool) -> Result<Self> {
        Self::open(&DurableConfig {
            foreign_keys,
            ..DurableConfig::default()
        })
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn mark_ready(&mut self) {
        self.state = HandleState::Ready;
    }

    pub fn mark_failed(&mut self) {
        self.state = HandleState::Failed;
    }

    /// True while an explicit `BEGIN` is open on the connection.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Rows changed on this connection since it was opened, triggers
    /// included.
    pub fn total_changes(&self) -> Result<u64> {
        let sql = "SELECT total_changes()";
        self.conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| Error::from_sqlite(e, sql))
    }

    /// Run one statement and collect its rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        self.ensure_ready()?;
        run(&self.conn, sql, params)
    }

    /// Run one statement and return the number of rows it changed.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.query(sql, params).map(|rows| rows.rows_affected)
    }

    /// Run a batch of `;`-separated statements without parameters.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.ensure_ready()?;
        tracing::debug!(sql, "exec batch");
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::from_sqlite(e, sql))
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transaction_recorded(f).map(|(value, _)| value)
    }

    /// Like [`StoreHandle::transaction`], also returning the non-read
    /// statements that ran.
    pub fn transaction_recorded<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<(T, Vec<Statement>)> {
        self.ensure_ready()?;
        let inner = self
            .conn
            .transaction()
            .map_err(|e| Error::from_sqlite(e, "BEGIN"))?;
        let mut tx = Transaction {
            inner,
            statements: Vec::new(),
        };

        // An error drops `tx`, which rolls back.
        let value = f(&mut tx)?;

        let Transaction { inner, statements } = tx;
        inner
            .commit()
            .map_err(|e| Error::from_sqlite(e, "COMMIT"))?;
        Ok((value, statements))
    }

    /// Capture the full committed state of this handle.
    pub fn export_state(&mut self) -> Result<StateExport> {
        self.ensure_ready()?;
        StateExport::capture(&mut self.conn)
    }

    /// Load an export into this (empty, initializing) handle and mark it
    /// ready. On failure the handle is marked failed.
    pub fn load_state(&mut self, export: &StateExport) -> Result<()> {
        let loaded = export
            .load_into(&mut self.conn)
            .and_then(|()| self.apply_foreign_keys());
        match loaded {
            Ok(()) => {
                self.mark_ready();
                Ok(())
            }
            Err(err) => {
                self.mark_failed();
                Err(err)
            }
        }
    }

    fn apply_foreign_keys(&mut self) -> Result<()> {
        self.conn
            .pragma_update(None, "foreign_keys", self.foreign_keys)
            .map_err(|e| Error::StoreUnavailable(e.to_string()))
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            HandleState::Ready => Ok(()),
            HandleState::Initializing => {
                Err(Error::StoreUnavailable("store is still initializing".into()))
            }
            HandleState::Failed => Err(Error::StoreUnavailable("store failed to open".into())),
        }
    }
}

/// A transaction in progress on a [`StoreHandle`].
pub struct Transaction<'c> {
    inner: rusqlite::Transaction<'c>,
    statements: Vec<Statement>,
}

impl Transaction<'_> {
    /// Run one statement inside the transaction.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let rows = run(&self.inner, sql, params)?;
        if classify(sql).invalidates() {
            self.statements.push(Statement::new(sql, params.to_vec()));
        }
        Ok(rows)
    }

    /// Run one statement, returning the number of rows it changed.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.query(sql, params).map(|rows| rows.rows_affected)
    }

    /// Non-read statements run so far.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

fn run(conn: &Connection, sql: &str, params: &[Value]) -> Result<RowSet> {
    tracing::debug!(sql, params = params.len(), "query");

    let translated = translate_placeholders(sql);
    let mut stmt = conn
        .prepare(&translated)
        .map_err(|e| Error::from_sqlite(e, sql))?;

    let compound = is_compound(sql);
    let columns: Vec<Column> = stmt
        .columns()
        .iter()
        .map(|c| Column::new(c.name(), if compound { None } else { c.decl_type() }))
        .collect();

    if columns.is_empty() {
        let affected = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| Error::from_sqlite(e, sql))?;
        return Ok(RowSet::affected(affected));
    }

    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| Error::from_sqlite(e, sql))?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next().map_err(|e| Error::from_sqlite(e, sql))? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = row.get_ref(i).map_err(|e| Error::from_sqlite(e, sql))?;
            values.push(Value::from(value));
        }
        collected.push(values);
    }

    let set = RowSet {
        columns,
        rows: collected,
        rows_affected: 0,
    };
    set.validate()?;
    Ok(set)
}
