//! SQL endpoint routes.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_durable_exec, handle_durable_query, handle_durable_transaction, handle_exec,
    handle_query, ExecRequest, QueryRequest, QueryResponse, TransactionRequest,
    TransactionResponse,
};
use crate::AppState;

/// Create query routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(query_handler))
        .route("/exec", post(exec_handler))
        .route("/durable/query", post(durable_query_handler))
        .route("/durable/exec", post(durable_exec_handler))
        .route("/durable/transaction", post(durable_transaction_handler))
}

/// POST /query - Run a statement against the active replica.
async fn query_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let response = handle_query(&state.db, request).await?;
    Ok(Json(response))
}

/// POST /exec - Run a batch against the active replica.
async fn exec_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<ExecRequest>,
) -> Result<StatusCode> {
    handle_exec(&state.db, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /durable/query - Run a statement against the durable store.
async fn durable_query_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let response = handle_durable_query(&state.db, request).await?;
    Ok(Json(response))
}

/// POST /durable/exec - Run a batch against the durable store.
async fn durable_exec_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<ExecRequest>,
) -> Result<StatusCode> {
    handle_durable_exec(&state.db, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /durable/transaction - Run statements in one durable transaction.
async fn durable_transaction_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<TransactionResponse>> {
    let response = handle_durable_transaction(&state.db, request).await?;
    Ok(Json(response))
}
