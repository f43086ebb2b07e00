//! WebSocket support for live queries.
//!
//! Clients connect to `/live`, register live queries, and receive their
//! results every time a write or a replica swap changes what they read.

mod manager;
mod protocol;

pub use manager::{ConnectionManager, MessageSender};
pub use protocol::*;
