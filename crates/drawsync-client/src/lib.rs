//! Client-side connection manager for the drawsync relay.
//!
//! A [`ConnectionManager`] owns one relay connection for one room. It
//! reconnects with linear backoff, frames outgoing drawing messages, and fans
//! inbound messages out to any number of local [`Subscription`]s.

pub mod backoff;
pub mod manager;
pub mod transport;

pub use backoff::Backoff;
pub use manager::{
    ConnectionManager, ConnectionState, ConnectionStatus, Inbound, ManagerOptions, SendError,
    Subscription,
};
pub use transport::{Connector, Frame, Transport, WsConnector};
