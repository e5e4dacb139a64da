//! Relay shared state.

use drawsync_core::config::RelayConfig;

use crate::rooms::RoomRegistry;

/// Shared relay state accessible from all connections and handlers.
pub struct RelayState {
    pub config: RelayConfig,
    pub rooms: RoomRegistry,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: RoomRegistry::new(),
        }
    }
}
