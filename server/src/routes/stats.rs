//! Query timing routes.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tandem_engine::{PhaseTiming, QueryStats, QueryTiming};

use crate::auth::AuthUser;
use crate::AppState;

const DEFAULT_RECENT: usize = 20;

/// Create stats routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats_handler).delete(clear_handler))
        .route("/stats/recent", get(recent_handler))
        .route("/stats/slow", get(slow_handler))
        .route("/stats/phases", get(phases_handler))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowQuery {
    /// Defaults to the configured slow query threshold
    pub threshold_ms: Option<u64>,
}

/// GET /stats
async fn stats_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<QueryStats> {
    Json(state.db.timer().stats())
}

/// GET /stats/recent?count=N - Newest first.
async fn recent_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<QueryTiming>> {
    let count = query.count.unwrap_or(DEFAULT_RECENT);
    Json(state.db.timer().recent(count))
}

/// GET /stats/slow?thresholdMs=N - Slowest first.
async fn slow_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<SlowQuery>,
) -> Json<Vec<QueryTiming>> {
    let threshold = query
        .threshold_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.slow_query_threshold);
    Json(state.db.timer().slow_queries(threshold))
}

/// GET /stats/phases - Export and replica load timings.
async fn phases_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<Vec<PhaseTiming>> {
    Json(state.db.timer().phases())
}

/// DELETE /stats
async fn clear_handler(State(state): State<AppState>, _auth: AuthUser) -> StatusCode {
    state.db.timer().clear();
    StatusCode::NO_CONTENT
}
