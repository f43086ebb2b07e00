//! HTTP route definitions.

mod events;
mod health;
mod live;
mod query;
mod snapshots;
mod stats;

use crate::AppState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(query::routes())
        .merge(snapshots::routes())
        .merge(events::routes())
        .merge(stats::routes())
        .merge(live::routes())
}

/// The complete application with middleware and state applied.
pub fn create_app(state: AppState) -> Router {
    create_routes()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
