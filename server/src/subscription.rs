//! Channel subscriptions and signature validation
//!
//! Private and presence channels require the client to present
//! `HMAC-SHA256(app.secret, "{socket_id}:{channel}[:{channel_data}]")`,
//! obtained from the application's auth endpoint. Public channels subscribe
//! unconditionally.

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sidewinder_core::{
    Application, BrokerError, ChannelKind, ChannelRegistry, ProtocolMessage, SubscriptionId,
};

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a subscription request.
///
/// This is the same digest the application's auth endpoint hands to clients.
pub fn auth_signature(
    secret: &str,
    socket_id: &str,
    channel_id: &str,
    channel_data: Option<&str>,
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(signing_string(socket_id, channel_id, channel_data).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn signing_string(socket_id: &str, channel_id: &str, channel_data: Option<&str>) -> String {
    let mut to_sign = format!("{}:{}", socket_id, channel_id);
    if let Some(data) = channel_data {
        to_sign.push(':');
        to_sign.push_str(data);
    }
    to_sign
}

/// One pending subscribe request
pub struct Subscription {
    application: Arc<Application>,
    socket_id: String,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
    message: ProtocolMessage,
}

impl Subscription {
    pub fn new(
        application: Arc<Application>,
        socket_id: impl Into<String>,
        sender: mpsc::UnboundedSender<ProtocolMessage>,
        message: ProtocolMessage,
    ) -> Self {
        Self {
            application,
            socket_id: socket_id.into(),
            sender,
            message,
        }
    }

    /// Validate the request, acknowledge it, and register the delivery
    /// callback with the channel. Returns the channel name and the opaque
    /// subscription id the handler tracks for teardown.
    ///
    /// A failed signature check registers nothing.
    pub async fn subscribe(
        self,
        channels: &ChannelRegistry,
    ) -> Result<(String, SubscriptionId), BrokerError> {
        let channel_id = self
            .message
            .requested_channel()
            .ok_or_else(|| {
                BrokerError::SubscriptionError("subscribe request missing data.channel".into())
            })?
            .to_string();

        let kind = ChannelKind::of(&channel_id);
        if kind.requires_authentication() {
            self.verify_signature(&channel_id)?;
        }

        let channel = channels.channel(&self.application.app_id, &channel_id).await;

        let member: Option<Value> = if kind == ChannelKind::Presence {
            self.message
                .channel_data()
                .and_then(|raw| serde_json::from_str(raw).ok())
        } else {
            None
        };

        let succeeded = match kind {
            ChannelKind::Presence => {
                let presence = channel.presence_payload(member.as_ref()).await;
                ProtocolMessage::subscription_succeeded(&channel_id, json!({ "presence": presence }))
            }
            _ => ProtocolMessage::subscription_succeeded(&channel_id, json!({})),
        };
        if self.sender.send(succeeded).is_err() {
            warn!(socket_id = %self.socket_id, "Failed to queue subscription_succeeded");
        }

        let subscription_id = channel
            .subscribe(self.socket_id.clone(), self.sender.clone(), member)
            .await;
        debug!(
            socket_id = %self.socket_id,
            channel = %channel_id,
            subscription_id,
            "Subscribed to channel"
        );

        Ok((channel_id, subscription_id))
    }

    fn verify_signature(&self, channel_id: &str) -> Result<(), BrokerError> {
        let auth = self.message.auth().unwrap_or_default();
        let supplied = auth.split(':').nth(1).unwrap_or_default();
        let to_sign = signing_string(&self.socket_id, channel_id, self.message.channel_data());

        let mut mac = HmacSha256::new_from_slice(self.application.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(to_sign.as_bytes());

        let verified = match hex::decode(supplied) {
            Ok(signature) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        };
        if verified {
            Ok(())
        } else {
            Err(BrokerError::InvalidSignature(format!(
                "Invalid signature: Expected HMAC SHA256 hex digest of {}, but got {}",
                to_sign, auth
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe_frame(channel: &str, auth: Option<String>, channel_data: Option<&str>) -> ProtocolMessage {
        let mut data = json!({ "channel": channel });
        if let Some(auth) = auth {
            data["auth"] = json!(auth);
        }
        if let Some(channel_data) = channel_data {
            data["channel_data"] = json!(channel_data);
        }
        ProtocolMessage::new("pusher:subscribe", data)
    }

    fn application() -> Arc<Application> {
        Arc::new(Application::new("1", "app-key", "app-secret"))
    }

    #[tokio::test]
    async fn test_public_channel_needs_no_auth() {
        let channels = ChannelRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("MY_CHANNEL", None, None),
        );

        let (channel_id, _) = subscription.subscribe(&channels).await.unwrap();
        assert_eq!(channel_id, "MY_CHANNEL");

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "pusher_internal:subscription_succeeded");
        assert_eq!(frame.channel.as_deref(), Some("MY_CHANNEL"));
        assert_eq!(
            channels.lookup("1", "MY_CHANNEL").await.unwrap().subscriber_count().await,
            1
        );
    }

    #[tokio::test]
    async fn test_private_channel_accepts_valid_signature() {
        let channels = ChannelRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = format!(
            "app-key:{}",
            auth_signature("app-secret", "socket-1", "private-chat", None)
        );
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("private-chat", Some(auth), None),
        );

        subscription.subscribe(&channels).await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap().event,
            "pusher_internal:subscription_succeeded"
        );
    }

    #[tokio::test]
    async fn test_invalid_signature_registers_nothing() {
        let channels = ChannelRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("private-chat", Some("app-key:deadbeef".to_string()), None),
        );

        let err = subscription.subscribe(&channels).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidSignature(_)));
        assert!(err.to_string().contains("socket-1:private-chat"));

        // No acknowledgement, no delivery callback, no channel created
        assert!(rx.try_recv().is_err());
        assert!(channels.lookup("1", "private-chat").await.is_none());
    }

    #[tokio::test]
    async fn test_channel_data_is_part_of_signing_string() {
        let channels = ChannelRegistry::new();
        let member = r#"{"user_id":"alice"}"#;

        // Signature computed without channel_data must not authorize a
        // request carrying it
        let (tx, _rx) = mpsc::unbounded_channel();
        let stale = format!(
            "app-key:{}",
            auth_signature("app-secret", "socket-1", "presence-lobby", None)
        );
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("presence-lobby", Some(stale), Some(member)),
        );
        assert!(subscription.subscribe(&channels).await.is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = format!(
            "app-key:{}",
            auth_signature("app-secret", "socket-1", "presence-lobby", Some(member))
        );
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("presence-lobby", Some(auth), Some(member)),
        );
        subscription.subscribe(&channels).await.unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.data["presence"]["count"], 1);
        assert!(frame.data["presence"]["hash"].get("alice").is_some());
    }

    #[tokio::test]
    async fn test_missing_auth_field_is_rejected() {
        let channels = ChannelRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(
            application(),
            "socket-1",
            tx,
            subscribe_frame("private-chat", None, None),
        );
        assert!(subscription.subscribe(&channels).await.is_err());
    }
}
