//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and the live queries each one
//! registered, and broadcasts replica changes to all of them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tandem_engine::SubscriptionId;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Bearer token the client connected with
    pub client: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Live queries registered through this connection
    pub subscriptions: Vec<SubscriptionId>,
    pub connected_at: DateTime<Utc>,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, client: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            client,
            sender,
            subscriptions: Vec::new(),
            connected_at: Utc::now(),
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection, returning the live queries it still held.
    pub fn unregister(&self, conn_id: &str) -> Vec<SubscriptionId> {
        match self.connections.remove(conn_id) {
            Some((_, conn)) => {
                tracing::info!(
                    conn_id = %conn_id,
                    client = %conn.client,
                    subscriptions = conn.subscriptions.len(),
                    connected_ms = (Utc::now() - conn.connected_at).num_milliseconds(),
                    "WebSocket connection unregistered"
                );
                conn.subscriptions
            }
            None => Vec::new(),
        }
    }

    /// Record that `conn_id` owns `subscription`.
    pub fn track(&self, conn_id: &str, subscription: SubscriptionId) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                conn.subscriptions.push(subscription);
                true
            }
            None => false,
        }
    }

    /// Forget `subscription` if `conn_id` owns it. Returns whether it did.
    pub fn untrack(&self, conn_id: &str, subscription: SubscriptionId) -> bool {
        match self.connections.get_mut(conn_id) {
            Some(mut conn) => {
                let before = conn.subscriptions.len();
                conn.subscriptions.retain(|id| *id != subscription);
                conn.subscriptions.len() != before
            }
            None => false,
        }
    }

    /// Broadcast a message to all connections.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            if entry.value().sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(recipients = sent_count, "Broadcast message to connections");

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Live queries held across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscriptions.len())
            .sum()
    }
}
