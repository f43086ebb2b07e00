//! Mutation event log and logical clock routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tandem_engine::{LogicalTimestamp, MutationEvent};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::AppState;

/// Create event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(events_handler).delete(prune_handler))
        .route("/clock", get(clock_handler))
        .route("/clock/sync", post(sync_handler))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only events stamped after this logical timestamp
    pub since: Option<LogicalTimestamp>,
}

#[derive(Debug, Deserialize)]
pub struct PruneQuery {
    /// Drop events stamped at or before this logical timestamp
    pub through: LogicalTimestamp,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub pruned: usize,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    /// Logical timestamp observed elsewhere
    pub timestamp: i64,
}

/// Current clock position.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockResponse {
    pub session_id: String,
    /// Timestamp the next event will receive
    pub next: LogicalTimestamp,
}

/// GET /events - Retained mutation events.
async fn events_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<MutationEvent>> {
    Json(state.db.events_since(query.since))
}

/// DELETE /events?through=N - Drop acknowledged events.
async fn prune_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<PruneQuery>,
) -> Json<PruneResponse> {
    Json(PruneResponse {
        pruned: state.db.prune_events(query.through),
    })
}

/// GET /clock
async fn clock_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<ClockResponse> {
    Json(clock_response(&state))
}

/// POST /clock/sync - Advance the clock past a remote timestamp.
async fn sync_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<SyncRequest>,
) -> Result<Json<ClockResponse>> {
    state.db.sync_clock(request.timestamp)?;
    Ok(Json(clock_response(&state)))
}

fn clock_response(state: &AppState) -> ClockResponse {
    ClockResponse {
        session_id: state.db.session_id().to_string(),
        next: state.db.clock().peek(),
    }
}
