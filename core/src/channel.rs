//! Channels and client-message fan-out
//!
//! A channel is a named pub/sub topic scoped to one application. Its kind
//! (public/private/presence) is a pure function of the name prefix and
//! governs authorization: private and presence channels require a signed
//! subscription and allow client events, public channels neither.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::protocol::ProtocolMessage;

/// Opaque handle returned by [`Channel::subscribe`]
pub type SubscriptionId = u64;

/// Channel kind, derived from the channel-name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    /// Determine the kind of a channel from its name
    pub fn of(channel_id: &str) -> Self {
        if channel_id.starts_with("private-") {
            ChannelKind::Private
        } else if channel_id.starts_with("presence-") {
            ChannelKind::Presence
        } else {
            ChannelKind::Public
        }
    }

    /// Whether subscribing requires a valid HMAC signature
    pub fn requires_authentication(&self) -> bool {
        !matches!(self, ChannelKind::Public)
    }

    /// Whether subscribers may originate `client-*` events
    pub fn allows_client_events(&self) -> bool {
        matches!(self, ChannelKind::Private | ChannelKind::Presence)
    }
}

struct Subscriber {
    socket_id: String,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
    /// Presence member payload (`channel_data`), None on other kinds
    member: Option<Value>,
}

/// A single channel: the authority for fan-out
pub struct Channel {
    channel_id: String,
    kind: ChannelKind,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl Channel {
    pub fn new(channel_id: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        let kind = ChannelKind::of(&channel_id);
        Self {
            channel_id,
            kind,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Register a delivery callback; returns the id needed to unsubscribe
    pub async fn subscribe(
        &self,
        socket_id: impl Into<String>,
        sender: mpsc::UnboundedSender<ProtocolMessage>,
        member: Option<Value>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id,
            Subscriber {
                socket_id: socket_id.into(),
                sender,
                member,
            },
        );
        id
    }

    /// Remove a subscription; removing an unknown id is not an error
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(&id);
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Fan a client event out to every subscriber except the sender
    /// (identified by the `socket_id` stamped on the frame)
    pub async fn send_client_message(&self, message: &ProtocolMessage) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut sent = 0;

        for subscriber in subscribers.values() {
            if message.socket_id.as_deref() == Some(subscriber.socket_id.as_str()) {
                continue;
            }
            if subscriber.sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                warn!(
                    channel = %self.channel_id,
                    socket_id = %subscriber.socket_id,
                    "Failed to deliver client event (channel closed)"
                );
            }
        }

        sent
    }

    /// Fan a server-originated publication out to every subscriber
    pub async fn broadcast(&self, message: &ProtocolMessage) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut sent = 0;

        for subscriber in subscribers.values() {
            if subscriber.sender.send(message.clone()).is_ok() {
                sent += 1;
            }
        }

        sent
    }

    /// Presence payload (`ids`/`hash`/`count`) for `subscription_succeeded`,
    /// optionally including one not-yet-registered member
    pub async fn presence_payload(&self, joining: Option<&Value>) -> Value {
        let subscribers = self.subscribers.read().await;
        let members = subscribers
            .values()
            .filter_map(|subscriber| subscriber.member.as_ref())
            .chain(joining);

        let mut ids = Vec::new();
        let mut hash = serde_json::Map::new();
        for member in members {
            let user_id = match member.get("user_id") {
                Some(Value::String(id)) => id.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            let user_info = member.get("user_info").cloned().unwrap_or(Value::Null);
            if !hash.contains_key(&user_id) {
                ids.push(user_id.clone());
                hash.insert(user_id, user_info);
            }
        }

        json!({
            "ids": ids,
            "hash": hash,
            "count": ids.len(),
        })
    }
}

/// Per-application channel lookup, creating channels lazily on first use
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, HashMap<String, Arc<Channel>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the channel with this name for this application
    pub async fn channel(&self, app_id: &str, channel_id: &str) -> Arc<Channel> {
        let mut channels = self.channels.write().await;
        channels
            .entry(app_id.to_string())
            .or_default()
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Channel::new(channel_id)))
            .clone()
    }

    /// Look a channel up without creating it
    pub async fn lookup(&self, app_id: &str, channel_id: &str) -> Option<Arc<Channel>> {
        let channels = self.channels.read().await;
        channels.get(app_id)?.get(channel_id).cloned()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
