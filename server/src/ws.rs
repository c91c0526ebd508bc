//! Axum WebSocket endpoint
//!
//! Clients connect to `/app/:app_key`. Each upgraded socket gets its own
//! handler task: the read loop drives the protocol engine strictly in
//! order, while a dedicated write task drains the connection's outbound
//! queue — the per-connection logic never blocks other connections.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use sidewinder_core::{ApplicationRegistry, ChannelRegistry, ProtocolMessage};
use sidewinder_metrics::MetricsEngine;

use crate::config::ServerConfig;
use crate::handler::ConnectionHandler;

/// Shared state behind every WebSocket route
pub struct ServerState {
    pub applications: Arc<dyn ApplicationRegistry>,
    pub channels: Arc<ChannelRegistry>,
    pub metrics: Arc<MetricsEngine>,
    pub config: ServerConfig,
}

impl ServerState {
    pub fn new(
        applications: Arc<dyn ApplicationRegistry>,
        channels: Arc<ChannelRegistry>,
        metrics: Arc<MetricsEngine>,
        config: ServerConfig,
    ) -> Self {
        Self {
            applications,
            channels,
            metrics,
            config,
        }
    }
}

/// Build the broker router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/app/:app_key", get(websocket_handler))
        .with_state(state)
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(app_key): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    info!(app_key = %app_key, peer = %peer, "WebSocket upgrade request");
    ws.on_upgrade(move |socket| handle_socket(socket, app_key, peer.to_string(), state))
}

async fn handle_socket(socket: WebSocket, app_key: String, peer: String, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProtocolMessage>();

    // Write task: serialize queued frames and push them to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to serialize outbound frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut handler = ConnectionHandler::new(
        state.applications.clone(),
        state.channels.clone(),
        state.metrics.clone(),
        app_key,
        peer.clone(),
        state.config.activity_timeout_secs,
        tx,
    );

    // Admission failure: the error frame is queued; fall through so the
    // write task flushes it before the socket drops
    if handler.on_open().await.is_ok() {
        // Messages of one connection are processed strictly in order;
        // message N+1 is not read before N's side effects completed
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => handler.on_message(&text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong answered by the protocol layer, binary ignored
                Err(e) => {
                    warn!(peer = %peer, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
        handler.on_close().await;
    }

    // Dropping the handler drops the last producer-side sender once all
    // subscriptions are gone, letting the write task drain and exit
    drop(handler);
    let _ = send_task.await;
}
