//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.
//!
//! A subscription's initial `rows` message is sent before its `subscribed`
//! confirmation; both hold the subscription ID.

use serde::{Deserialize, Serialize};
use tandem_engine::{LiveUpdate, ReplicaId, SnapshotId, SubscriptionId, Value};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register a live query against the active replica.
    Subscribe {
        sql: String,
        /// Positional parameters for `$1, $2, ...`
        #[serde(default)]
        params: Vec<Value>,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Drop a live query registered by this connection.
    Unsubscribe {
        subscription_id: SubscriptionId,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A live query was registered.
    Subscribed {
        subscription_id: SubscriptionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Current result of a live query.
    Rows {
        subscription_id: SubscriptionId,
        /// Replica the query ran against
        replica: ReplicaId,
        /// 0 for the initial result
        sequence: u64,
        /// Whether the result differs from the previous delivery
        changed: bool,
        /// Column names, in result order
        columns: Vec<String>,
        /// One object per row, keyed by column name
        rows: Vec<serde_json::Value>,
    },

    /// A live query was removed.
    Unsubscribed {
        subscription_id: SubscriptionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A different replica became active. Every live query was already
    /// re-run against it, so its `rows` arrive before this message.
    ReplicaSwapped {
        replica: ReplicaId,
        /// Snapshot the replica was restored from, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<SnapshotId>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Live query whose re-execution failed (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        subscription_id: Option<SubscriptionId>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
            subscription_id: None,
        }
    }

    /// Convert a live query delivery into `rows`, or `error` when the
    /// re-execution failed.
    pub fn from_update(update: &LiveUpdate) -> Self {
        match &update.result {
            Ok(rows) => ServerMessage::Rows {
                subscription_id: update.subscription,
                replica: update.replica,
                sequence: update.sequence,
                changed: update.changed,
                columns: rows.columns.iter().map(|c| c.name.clone()).collect(),
                rows: rows.to_json_objects(),
            },
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
                request_id: None,
                subscription_id: Some(update.subscription),
            },
        }
    }
}
