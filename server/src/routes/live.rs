//! Live query WebSocket route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Create live query routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/live", get(live_handler))
}

/// GET /live - Upgrade to a live query WebSocket.
async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, auth.token))
}
