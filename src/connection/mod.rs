//! Connection management for the duplex session channel.
//!
//! One logical channel exists per session. The [`ConnectionManager`] performs
//! the authentication handshake, forwards inbound messages to the engine, and
//! schedules reconnects with exponential backoff when the channel drops. The
//! transport itself sits behind the [`Channel`]/[`ChannelConnector`] traits so
//! tests can substitute an in-memory duplex pair for the WebSocket client.

pub mod backoff;
pub mod channel;
pub mod manager;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelConnector, ConnectionError, WsConnector};
pub use manager::{ChannelEvent, ConnectionManager, ConnectionState};
