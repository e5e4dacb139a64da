//! Room relay: a WebSocket server that fans every inbound frame out to the
//! other members of the sender's room.
//!
//! The relay does not interpret payloads. Drawing events, prompts and binary
//! canvas snapshots all travel the same path.

pub mod connection;
pub mod rooms;
pub mod server;
pub mod state;

pub use rooms::{BroadcastReport, Frame, RoomRegistry};
pub use server::{router, serve, start_relay};
pub use state::RelayState;
