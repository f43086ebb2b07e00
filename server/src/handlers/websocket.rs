//! WebSocket handler for live queries.
//!
//! Each connection registers live queries with the shared [`LocalDb`]. Their
//! results are pushed straight into the connection's outgoing channel, so
//! a write or a replica swap reaches every client without polling.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tandem_engine::{Delivery, LiveUpdate, Subscriber};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, MessageSender, ServerMessage};
use crate::AppState;

/// Forwards live query results to one WebSocket connection.
struct SocketSubscriber(MessageSender);

impl Subscriber for SocketSubscriber {
    fn deliver(&mut self, update: &LiveUpdate) -> Delivery {
        match self.0.send(ServerMessage::from_update(update)) {
            Ok(()) => Delivery::Continue,
            Err(_) => Delivery::Closed,
        }
    }
}

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Unsubscribes everything the connection registered on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState, client: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = state.conn_manager.register(client.clone(), tx.clone());

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        "WebSocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &state, &conn_id, &tx).await;
                state.conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    for subscription in state.conn_manager.unregister(&conn_id) {
        state.db.unsubscribe(subscription).await;
    }
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        active_connections = state.conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
async fn process_message(
    text: &str,
    state: &AppState,
    conn_id: &str,
    sender: &MessageSender,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Subscribe {
            sql,
            params,
            request_id,
        } => {
            let subscriber = SocketSubscriber(sender.clone());
            match state.db.subscribe_with(&sql, &params, subscriber).await {
                Ok(subscription_id) => {
                    state.conn_manager.track(conn_id, subscription_id);
                    tracing::debug!(
                        conn_id = %conn_id,
                        subscription = %subscription_id,
                        "Live query subscribed"
                    );
                    ServerMessage::Subscribed {
                        subscription_id,
                        request_id,
                    }
                }
                Err(e) => ServerMessage::error(e.to_string(), request_id),
            }
        }

        ClientMessage::Unsubscribe {
            subscription_id,
            request_id,
        } => {
            // only the owning connection may drop a subscription
            if !state.conn_manager.untrack(conn_id, subscription_id) {
                return ServerMessage::error(
                    format!("Unknown subscription: {}", subscription_id),
                    request_id,
                );
            }
            state.db.unsubscribe(subscription_id).await;
            ServerMessage::Unsubscribed {
                subscription_id,
                request_id,
            }
        }

        ClientMessage::Ping => ServerMessage::Pong,
    }
}
