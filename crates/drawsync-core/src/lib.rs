//! Core config, errors, and room identifiers for drawsync.

pub mod config;
pub mod error;
pub mod room;

pub use error::{DrawSyncError, Result};
pub use room::RoomId;
