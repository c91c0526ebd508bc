//! Convenience re-exports for sidewinder-server users

pub use crate::config::ServerConfig;
pub use crate::connection::Connection;
pub use crate::handler::ConnectionHandler;
pub use crate::subscription::{auth_signature, Subscription};
pub use crate::ws::{router, websocket_handler, ServerState};
