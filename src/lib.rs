//! # sidewinder
//!
//! A Pusher-compatible real-time pub/sub broker with cluster-wide
//! connection and message limits.
//!
//! ## Features
//!
//! - **Pusher wire protocol**: public, private and presence channels,
//!   client events, HMAC-signed subscriptions
//! - **Cluster-wide limits**: nodes share live connection and message
//!   counts through a common counter store, so per-application limits hold
//!   across the whole cluster
//! - **Crash-tolerant accounting**: stale entries left by a crashed node
//!   are swept on its next start
//! - **Coordinator-gated aggregation**: one elected node periodically folds
//!   live counters into per-application summaries for reporting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sidewinder::prelude::*;
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let applications = Arc::new(MemoryApplicationRegistry::new());
//!     applications
//!         .insert(Application::new("1", "app-key", "app-secret").with_connection_limit(100))
//!         .await;
//!
//!     let metrics = Arc::new(MetricsEngine::disabled(generate_node_id()));
//!     let state = Arc::new(ServerState::new(
//!         applications,
//!         Arc::new(ChannelRegistry::new()),
//!         metrics,
//!         ServerConfig::default(),
//!     ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(
//!         listener,
//!         sidewinder::router(state).into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod prelude;

// Re-export all public types from member crates
pub use sidewinder_config::BrokerConfig;

pub use sidewinder_core::{
    events, Application, ApplicationRegistry, BrokerError, Channel, ChannelKind, ChannelRegistry,
    MemoryApplicationRegistry, ProtocolMessage, SubscriptionId,
};

pub use sidewinder_metrics::{
    generate_node_id, ConnectionEntry, Counts, CounterStore, MasterElection, MemoryCounterStore,
    MetricsConfig, MetricsEngine, MetricsRecord, MetricsSummary, RedisCounterStore, RedisElection,
    StaticElection,
};

pub use sidewinder_server::{
    auth_signature, router, websocket_handler, Connection, ConnectionHandler, ServerConfig,
    ServerState, Subscription,
};

// The server crate re-exports axum-compatible pieces; the router needs axum
// itself at the call site
pub use axum;
