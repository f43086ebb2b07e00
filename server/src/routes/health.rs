//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tandem_engine::{HandleState, ReplicaId};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session_id: String,
    pub durable: HandleState,
    pub replica: ReplicaId,
    pub snapshots: usize,
    pub connections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler. Reports "degraded" once the durable store is no
/// longer ready; the replica keeps serving reads.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let durable = state.db.durable_state();
    let status = match durable {
        HandleState::Ready => "ok",
        _ => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_id: state.db.session_id().to_string(),
        durable,
        replica: state.db.active_replica_id(),
        snapshots: state.db.list_snapshots().len(),
        connections: state.conn_manager.connection_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tandem Server"
}
