//! Request handlers behind the HTTP and WebSocket routes.

mod query;
mod snapshots;
mod websocket;

pub use query::*;
pub use snapshots::*;
pub use websocket::handle_websocket_connection;
