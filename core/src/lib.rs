//! Core types for the sidewinder broker

pub mod app;
pub mod channel;
pub mod errors;
pub mod prelude;
pub mod protocol;

pub use app::{Application, ApplicationRegistry, MemoryApplicationRegistry};
pub use channel::{Channel, ChannelKind, ChannelRegistry, SubscriptionId};
pub use errors::BrokerError;
pub use protocol::{events, ProtocolMessage};
