//! WebSocket protocol engine for the sidewinder broker
//!
//! One [`ConnectionHandler`] per live socket decodes the Pusher wire
//! protocol, authenticates against the application registry, enforces the
//! cluster-wide admission limit through the metrics engine, and dispatches
//! subscribe/unsubscribe and client events to channels.

pub mod config;
pub mod connection;
pub mod handler;
pub mod prelude;
pub mod subscription;
pub mod ws;

pub use config::ServerConfig;
pub use connection::Connection;
pub use handler::ConnectionHandler;
pub use subscription::{auth_signature, Subscription};
pub use ws::{router, websocket_handler, ServerState};
