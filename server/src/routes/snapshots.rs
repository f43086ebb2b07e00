//! Snapshot and resync routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tandem_engine::{SnapshotId, SnapshotInfo};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{handle_create, handle_restore, handle_resync, ReplicaResponse, RestoreRequest};
use crate::AppState;

/// Create snapshot routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/snapshots", get(list_handler).post(create_handler))
        .route("/snapshots/restore", post(restore_handler))
        .route("/snapshots/{id}", delete(discard_handler))
        .route("/resync", post(resync_handler))
}

/// GET /snapshots - Retained snapshots, oldest first.
async fn list_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<Vec<SnapshotInfo>> {
    Json(state.db.list_snapshots())
}

/// POST /snapshots - Capture the durable store.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<(StatusCode, Json<SnapshotInfo>)> {
    let info = handle_create(&state.db).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// POST /snapshots/restore - Make a copy of a snapshot the active replica.
async fn restore_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<ReplicaResponse>> {
    let response = handle_restore(&state.db, &state.conn_manager, request).await?;
    Ok(Json(response))
}

/// DELETE /snapshots/{id} - Discard a snapshot.
async fn discard_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id: SnapshotId = id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid snapshot id: {}", id)))?;
    state.db.discard_snapshot(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /resync - Rebuild the active replica from the durable store.
async fn resync_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<ReplicaResponse>> {
    let response = handle_resync(&state.db, &state.conn_manager).await?;
    Ok(Json(response))
}
