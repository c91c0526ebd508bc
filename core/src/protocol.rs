//! Pusher protocol wire frames
//!
//! Every frame in both directions is a UTF-8 text message carrying
//! `{event, data, channel?, socket_id?}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::BrokerError;

/// Built-in event names
pub mod events {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

    /// Prefix marking client-originated events
    pub const CLIENT_PREFIX: &str = "client-";
}

/// A single protocol frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Event name
    pub event: String,
    /// Event payload (business data)
    #[serde(default)]
    pub data: Value,
    /// Channel the frame is scoped to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Originating socket id, stamped by the server on client events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
}

impl ProtocolMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            channel: None,
            socket_id: None,
        }
    }

    /// Parse an inbound text frame
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        serde_json::from_str(raw).map_err(|_| BrokerError::InvalidJson)
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, BrokerError> {
        serde_json::to_string(self).map_err(BrokerError::SerializationError)
    }

    /// `pusher:connection_established` sent once a connection is admitted
    pub fn connection_established(socket_id: &str, activity_timeout_secs: u64) -> Self {
        Self::new(
            events::CONNECTION_ESTABLISHED,
            json!({
                "socket_id": socket_id,
                "activity_timeout": activity_timeout_secs,
            }),
        )
    }

    /// `pusher:error` with an optional numeric code
    pub fn error(code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let data = match code {
            Some(code) => json!({ "code": code, "message": message }),
            None => json!({ "message": message }),
        };
        Self::new(events::ERROR, data)
    }

    /// `pusher:pong` reply to a client ping
    pub fn pong() -> Self {
        Self::new(events::PONG, json!({}))
    }

    /// `pusher_internal:subscription_succeeded` scoped to a channel
    pub fn subscription_succeeded(channel: &str, data: Value) -> Self {
        let mut message = Self::new(events::SUBSCRIPTION_SUCCEEDED, data);
        message.channel = Some(channel.to_string());
        message
    }

    /// True for `client-*` events relayed between subscribers
    pub fn is_client_event(&self) -> bool {
        self.event.starts_with(events::CLIENT_PREFIX)
    }

    /// `data.channel` of a subscribe/unsubscribe request
    pub fn requested_channel(&self) -> Option<&str> {
        self.data.get("channel").and_then(Value::as_str)
    }

    /// `data.auth` of a subscribe request
    pub fn auth(&self) -> Option<&str> {
        self.data.get("auth").and_then(Value::as_str)
    }

    /// `data.channel_data` of a subscribe request (a JSON-encoded string)
    pub fn channel_data(&self) -> Option<&str> {
        self.data.get("channel_data").and_then(Value::as_str)
    }
}
