//! Per-socket connection state
//!
//! One `Connection` per live socket, owned exclusively by its handling task.
//! It tracks which subscriptions the socket holds so they can be torn down
//! on unsubscribe or close.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use sidewinder_core::{Application, ProtocolMessage, SubscriptionId};

/// State of one admitted connection
pub struct Connection {
    socket_id: String,
    peer: String,
    application: Arc<Application>,
    /// channel name -> subscription id, for teardown
    subscriptions: HashMap<String, SubscriptionId>,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
}

impl Connection {
    pub fn new(
        application: Arc<Application>,
        peer: impl Into<String>,
        sender: mpsc::UnboundedSender<ProtocolMessage>,
    ) -> Self {
        Self {
            socket_id: Uuid::new_v4().to_string(),
            peer: peer.into(),
            application,
            subscriptions: HashMap::new(),
            sender,
        }
    }

    /// Stable identifier assigned at establishment
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn sender(&self) -> &mpsc::UnboundedSender<ProtocolMessage> {
        &self.sender
    }

    /// Queue a frame for the write task
    pub fn send(&self, message: ProtocolMessage) {
        if self.sender.send(message).is_err() {
            warn!(
                socket_id = %self.socket_id,
                "Failed to queue frame (connection closing)"
            );
        }
    }

    pub fn track_subscription(&mut self, channel_id: String, id: SubscriptionId) {
        self.subscriptions.insert(channel_id, id);
    }

    pub fn remove_subscription(&mut self, channel_id: &str) -> Option<SubscriptionId> {
        self.subscriptions.remove(channel_id)
    }

    pub fn is_subscribed(&self, channel_id: &str) -> bool {
        self.subscriptions.contains_key(channel_id)
    }

    /// Drain all subscriptions for close-time teardown
    pub fn take_subscriptions(&mut self) -> Vec<(String, SubscriptionId)> {
        self.subscriptions.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_bookkeeping() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let application = Arc::new(Application::new("1", "app-key", "app-secret"));
        let mut connection = Connection::new(application, "10.0.0.1:4242", tx);

        assert!(!connection.is_subscribed("private-chat"));
        connection.track_subscription("private-chat".to_string(), 7);
        assert!(connection.is_subscribed("private-chat"));

        assert_eq!(connection.remove_subscription("private-chat"), Some(7));
        assert_eq!(connection.remove_subscription("private-chat"), None);
    }

    #[test]
    fn test_socket_ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let application = Arc::new(Application::new("1", "app-key", "app-secret"));
        let first = Connection::new(application.clone(), "10.0.0.1:1", tx.clone());
        let second = Connection::new(application, "10.0.0.1:2", tx);
        assert_ne!(first.socket_id(), second.socket_id());
    }
}
