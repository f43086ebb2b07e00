//! Query handlers - run SQL against the active replica or the durable store.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use tandem_engine::{Column, LocalDb, RowSet, Statement};

/// Request body for a single statement.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub sql: String,
    /// Positional parameters for `$1, $2, ...`
    #[serde(default)]
    pub params: Vec<tandem_engine::Value>,
}

/// Request body for a batch of statements without parameters.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub sql: String,
}

/// Request body for a durable transaction.
#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub statements: Vec<Statement>,
}

/// Result of one statement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub columns: Vec<Column>,
    /// One object per row, keyed by column name
    pub rows: Vec<serde_json::Value>,
    pub rows_affected: usize,
}

impl From<RowSet> for QueryResponse {
    fn from(rows: RowSet) -> Self {
        Self {
            rows: rows.to_json_objects(),
            rows_affected: rows.rows_affected,
            columns: rows.columns,
        }
    }
}

/// Results of a durable transaction, in statement order.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub results: Vec<QueryResponse>,
}

fn require_sql(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(AppError::BadRequest("sql must not be empty".to_string()));
    }
    Ok(())
}

/// Run a statement against the active replica.
pub async fn handle_query(db: &LocalDb, request: QueryRequest) -> Result<QueryResponse> {
    require_sql(&request.sql)?;
    let rows = db.query(&request.sql, &request.params).await?;
    Ok(rows.into())
}

/// Run a batch against the active replica.
pub async fn handle_exec(db: &LocalDb, request: ExecRequest) -> Result<()> {
    require_sql(&request.sql)?;
    db.exec(&request.sql).await?;
    Ok(())
}

/// Run a statement against the durable store.
pub async fn handle_durable_query(db: &LocalDb, request: QueryRequest) -> Result<QueryResponse> {
    require_sql(&request.sql)?;
    let rows = db.durable_query(&request.sql, &request.params).await?;
    Ok(rows.into())
}

/// Run a batch against the durable store.
pub async fn handle_durable_exec(db: &LocalDb, request: ExecRequest) -> Result<()> {
    require_sql(&request.sql)?;
    db.durable_exec(&request.sql).await?;
    Ok(())
}

/// Run every statement in one durable transaction. Any failure rolls the
/// whole transaction back.
pub async fn handle_durable_transaction(
    db: &LocalDb,
    request: TransactionRequest,
) -> Result<TransactionResponse> {
    if request.statements.is_empty() {
        return Err(AppError::BadRequest(
            "transaction needs at least one statement".to_string(),
        ));
    }
    for statement in &request.statements {
        require_sql(&statement.sql)?;
    }

    let statements = request.statements;
    let results = db
        .durable_transaction(move |tx| {
            statements
                .iter()
                .map(|statement| tx.query(&statement.sql, &statement.params))
                .collect::<tandem_engine::Result<Vec<_>>>()
        })
        .await?;

    tracing::debug!(statements = results.len(), "Durable transaction committed");

    Ok(TransactionResponse {
        results: results.into_iter().map(QueryResponse::from).collect(),
    })
}
