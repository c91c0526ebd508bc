//! Per-connection protocol engine
//!
//! One handler per live socket, driven by the transport layer through
//! `on_open` / `on_message` / `on_close`. The handler owns the connection
//! state machine (`Connecting → Admitted → Active → Closed`): admission
//! happens in `on_open`, messages are only processed while the connection
//! is active, and `on_close` tears everything down.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use sidewinder_core::{
    events, ApplicationRegistry, BrokerError, ChannelRegistry, ProtocolMessage,
};
use sidewinder_metrics::MetricsEngine;

use crate::connection::Connection;
use crate::subscription::Subscription;

/// Protocol engine for one socket
pub struct ConnectionHandler {
    applications: Arc<dyn ApplicationRegistry>,
    channels: Arc<ChannelRegistry>,
    metrics: Arc<MetricsEngine>,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
    app_key: String,
    peer: String,
    activity_timeout_secs: u64,
    /// Some once the connection is active, None before admission and after close
    connection: Option<Connection>,
}

impl ConnectionHandler {
    pub fn new(
        applications: Arc<dyn ApplicationRegistry>,
        channels: Arc<ChannelRegistry>,
        metrics: Arc<MetricsEngine>,
        app_key: impl Into<String>,
        peer: impl Into<String>,
        activity_timeout_secs: u64,
        sender: mpsc::UnboundedSender<ProtocolMessage>,
    ) -> Self {
        Self {
            applications,
            channels,
            metrics,
            sender,
            app_key: app_key.into(),
            peer: peer.into(),
            activity_timeout_secs,
            connection: None,
        }
    }

    /// Socket id of the active connection, if admitted
    pub fn socket_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|connection| connection.socket_id())
    }

    fn send_frame(&self, message: ProtocolMessage) {
        if self.sender.send(message).is_err() {
            warn!(peer = %self.peer, "Failed to queue frame (connection closing)");
        }
    }

    /// Authenticate and admit the connection.
    ///
    /// On error the caller must close the socket; the error frame has
    /// already been queued.
    pub async fn on_open(&mut self) -> Result<(), BrokerError> {
        let application = match self.applications.find_by_key(&self.app_key).await {
            Some(application) => application,
            None => {
                let err = BrokerError::AppKeyNotFound(self.app_key.clone());
                self.send_frame(ProtocolMessage::error(Some(err.code()), err.to_string()));
                error!(app_key = %self.app_key, peer = %self.peer, "Application key not found");
                return Err(err);
            }
        };

        if self.metrics.over_connection_limit(&application).await {
            let err = BrokerError::OverConnectionLimit;
            self.send_frame(ProtocolMessage::error(Some(err.code()), err.to_string()));
            error!(
                app_id = %application.app_id,
                peer = %self.peer,
                "Application is over the limit of number of connections"
            );
            return Err(err);
        }

        let connection = Connection::new(application.clone(), self.peer.clone(), self.sender.clone());
        connection.send(ProtocolMessage::connection_established(
            connection.socket_id(),
            self.activity_timeout_secs,
        ));
        debug!(socket_id = %connection.socket_id(), peer = %self.peer, "Connection established");

        if let Err(e) = self.metrics.connection_opened(&application, &self.peer).await {
            warn!(error = %e, "Failed to record new connection");
        }

        self.connection = Some(connection);
        Ok(())
    }

    /// Handle one inbound text frame.
    ///
    /// Protocol errors are reported to the client; nothing here tears the
    /// connection down.
    pub async fn on_message(&mut self, raw: &str) {
        if self.connection.is_none() {
            return;
        }
        match self.dispatch(raw).await {
            Ok(()) => {}
            Err(err @ BrokerError::InvalidJson) => {
                error!(peer = %self.peer, message = %raw, "JSON parse error on message");
                self.send_frame(ProtocolMessage::error(Some(err.code()), err.to_string()));
            }
            Err(err) => {
                error!(peer = %self.peer, error = %err, "Error while handling message");
                self.send_frame(ProtocolMessage::error(Some(500), err.to_string()));
            }
        }
    }

    async fn dispatch(&mut self, raw: &str) -> Result<(), BrokerError> {
        let message = ProtocolMessage::parse(raw)?;

        if message.is_client_event() {
            return self.relay_client_event(message).await;
        }

        match message.event.as_str() {
            events::PING => {
                self.send_frame(ProtocolMessage::pong());
                debug!(peer = %self.peer, "Pong sent");
                Ok(())
            }
            events::PONG => {
                debug!(peer = %self.peer, "Pong received");
                Ok(())
            }
            events::SUBSCRIBE => self.subscribe(message).await,
            events::UNSUBSCRIBE => self.unsubscribe(message).await,
            other => {
                error!(event = %other, "Unknown event");
                Ok(())
            }
        }
    }

    /// Relay a `client-*` event to its channel.
    ///
    /// Unauthorized events are dropped without an error frame so channel
    /// existence and membership never leak to the sender.
    async fn relay_client_event(&mut self, mut message: ProtocolMessage) -> Result<(), BrokerError> {
        let Some(connection) = self.connection.as_ref() else {
            return Ok(());
        };

        let Some(channel_id) = message.channel.clone() else {
            debug!(event = %message.event, "Dropping client event without channel");
            return Ok(());
        };
        if !connection.is_subscribed(&channel_id) {
            debug!(
                socket_id = %connection.socket_id(),
                channel = %channel_id,
                "Dropping client event from non-subscriber"
            );
            return Ok(());
        }

        let application = connection.application().clone();
        let Some(channel) = self.channels.lookup(&application.app_id, &channel_id).await else {
            return Ok(());
        };
        if !channel.kind().allows_client_events() {
            debug!(channel = %channel_id, "Dropping client event on public channel");
            return Ok(());
        }

        if self.metrics.over_message_limit(&application).await {
            warn!(
                app_id = %application.app_id,
                "Application is over the limit of number of messages; dropping client event"
            );
            return Ok(());
        }

        message.socket_id = Some(connection.socket_id().to_string());
        channel.send_client_message(&message).await;

        if let Err(e) = self.metrics.message_sent(&application).await {
            warn!(error = %e, "Failed to count message");
        }
        Ok(())
    }

    async fn subscribe(&mut self, message: ProtocolMessage) -> Result<(), BrokerError> {
        let (application, socket_id, sender) = match self.connection.as_ref() {
            Some(connection) => (
                connection.application().clone(),
                connection.socket_id().to_string(),
                connection.sender().clone(),
            ),
            None => return Ok(()),
        };

        let subscription = Subscription::new(application, socket_id, sender, message);
        match subscription.subscribe(self.channels.as_ref()).await {
            Ok((channel_id, subscription_id)) => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.track_subscription(channel_id, subscription_id);
                }
                Ok(())
            }
            Err(BrokerError::InvalidSignature(detail)) => {
                error!(peer = %self.peer, "Rejected subscription with invalid signature");
                self.send_frame(ProtocolMessage::error(None, detail));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn unsubscribe(&mut self, message: ProtocolMessage) -> Result<(), BrokerError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        let Some(channel_id) = message.requested_channel().map(str::to_string) else {
            debug!("Dropping unsubscribe without channel");
            return Ok(());
        };

        let app_id = connection.application().app_id.clone();
        if let Some(subscription_id) = connection.remove_subscription(&channel_id) {
            if let Some(channel) = self.channels.lookup(&app_id, &channel_id).await {
                channel.unsubscribe(subscription_id).await;
            }
            debug!(
                socket_id = %connection.socket_id(),
                channel = %channel_id,
                "Unsubscribed from channel"
            );
        }
        Ok(())
    }

    /// Tear the connection down: unregister every subscription (best-effort)
    /// and report the closure to the metrics engine.
    pub async fn on_close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        let app_id = connection.application().app_id.clone();
        for (channel_id, subscription_id) in connection.take_subscriptions() {
            if let Some(channel) = self.channels.lookup(&app_id, &channel_id).await {
                channel.unsubscribe(subscription_id).await;
            }
        }

        debug!(socket_id = %connection.socket_id(), peer = %self.peer, "Closed connection");
        if let Err(e) = self
            .metrics
            .connection_closed(connection.application(), &self.peer)
            .await
        {
            warn!(error = %e, "Failed to record closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidewinder_core::{Application, MemoryApplicationRegistry};
    use sidewinder_metrics::{MemoryCounterStore, MetricsConfig, MetricsEngine};

    async fn handler_for(
        app: Application,
    ) -> (
        ConnectionHandler,
        mpsc::UnboundedReceiver<ProtocolMessage>,
    ) {
        let applications = Arc::new(MemoryApplicationRegistry::new());
        let key = app.key.clone();
        applications.insert(app).await;
        let channels = Arc::new(ChannelRegistry::new());
        let metrics = Arc::new(MetricsEngine::new(
            Arc::new(MemoryCounterStore::new()),
            "node-1",
            &MetricsConfig::default().with_enabled(true),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let handler =
            ConnectionHandler::new(applications, channels, metrics, key, "10.0.0.1:4242", 120, tx);
        (handler, rx)
    }

    #[tokio::test]
    async fn test_open_sends_connection_established() {
        let (mut handler, mut rx) =
            handler_for(Application::new("1", "app-key", "app-secret")).await;
        handler.on_open().await.unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "pusher:connection_established");
        assert_eq!(
            frame.data["socket_id"].as_str(),
            handler.socket_id()
        );
        assert_eq!(frame.data["activity_timeout"], 120);
    }

    #[tokio::test]
    async fn test_unknown_app_key_is_rejected_with_4001() {
        let applications = Arc::new(MemoryApplicationRegistry::new());
        let channels = Arc::new(ChannelRegistry::new());
        let metrics = Arc::new(MetricsEngine::disabled("node-1"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = ConnectionHandler::new(
            applications,
            channels,
            metrics,
            "no-such-key",
            "10.0.0.1:4242",
            120,
            tx,
        );

        assert!(handler.on_open().await.is_err());
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "pusher:error");
        assert_eq!(frame.data["code"], 4001);
    }

    #[tokio::test]
    async fn test_ping_gets_a_pong() {
        let (mut handler, mut rx) =
            handler_for(Application::new("1", "app-key", "app-secret")).await;
        handler.on_open().await.unwrap();
        let _ = rx.try_recv().unwrap();

        handler.on_message(r#"{"event":"pusher:ping","data":{}}"#).await;
        assert_eq!(rx.try_recv().unwrap().event, "pusher:pong");
    }

    #[tokio::test]
    async fn test_invalid_json_reports_5001_and_keeps_connection() {
        let (mut handler, mut rx) =
            handler_for(Application::new("1", "app-key", "app-secret")).await;
        handler.on_open().await.unwrap();
        let _ = rx.try_recv().unwrap();

        handler.on_message("{not json").await;
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "pusher:error");
        assert_eq!(frame.data["code"], 5001);

        // Connection is still active
        handler.on_message(r#"{"event":"pusher:ping","data":{}}"#).await;
        assert_eq!(rx.try_recv().unwrap().event, "pusher:pong");
    }

    #[tokio::test]
    async fn test_unknown_event_is_logged_and_dropped() {
        let (mut handler, mut rx) =
            handler_for(Application::new("1", "app-key", "app-secret")).await;
        handler.on_open().await.unwrap();
        let _ = rx.try_recv().unwrap();

        handler
            .on_message(r#"{"event":"pusher:nonsense","data":{}}"#)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (mut handler, mut rx) =
            handler_for(Application::new("1", "app-key", "app-secret")).await;
        handler.on_open().await.unwrap();
        let _ = rx.try_recv().unwrap();

        handler
            .on_message(r#"{"event":"pusher:subscribe","data":{"channel":"MY_CHANNEL"}}"#)
            .await;
        assert_eq!(
            rx.try_recv().unwrap().event,
            "pusher_internal:subscription_succeeded"
        );

        handler
            .on_message(r#"{"event":"pusher:unsubscribe","data":{"channel":"MY_CHANNEL"}}"#)
            .await;

        let channels = handler.channels.clone();
        let channel = channels.lookup("1", "MY_CHANNEL").await.unwrap();
        assert_eq!(channel.subscriber_count().await, 0);
    }
}
