//! Convenience re-exports for sidewinder-core users

pub use crate::app::{Application, ApplicationRegistry, MemoryApplicationRegistry};
pub use crate::channel::{Channel, ChannelKind, ChannelRegistry, SubscriptionId};
pub use crate::errors::BrokerError;
pub use crate::protocol::{events, ProtocolMessage};
