//! sidewinder broker daemon
//!
//! Reads an optional JSON configuration from the path in
//! `SIDEWINDER_CONFIG`, recovers stale metrics entries left by a previous
//! crash, serves the WebSocket endpoint, and cleans its own counter-store
//! entries up on graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use sidewinder_config::BrokerConfig;
use sidewinder_core::{ChannelRegistry, MemoryApplicationRegistry};
use sidewinder_metrics::{
    generate_node_id, MasterElection, MetricsConfig, MetricsEngine, RedisCounterStore,
    RedisElection,
};
use sidewinder_server::{router, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sidewinder=info".to_string()),
        )
        .init();

    let config = match std::env::var("SIDEWINDER_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            BrokerConfig::from_json(&raw)?
        }
        Err(_) => BrokerConfig::default(),
    };

    let server_config: ServerConfig = match &config.websocket {
        Some(section) => serde_json::from_value(section.clone())?,
        None => ServerConfig::default(),
    };
    let metrics_config: MetricsConfig = match &config.metrics {
        Some(section) => serde_json::from_value(section.clone())?,
        None => MetricsConfig::default(),
    };

    let applications = Arc::new(MemoryApplicationRegistry::new());
    if config.applications.is_empty() {
        warn!("No applications configured; every connection will be rejected");
    }
    for application in config.applications {
        applications.insert(application).await;
    }

    let node_id = generate_node_id();
    info!(node_id = %node_id, "Starting sidewinder node");

    let metrics = if metrics_config.enabled {
        let store = Arc::new(
            RedisCounterStore::new(&metrics_config.redis_url, metrics_config.key_prefix.clone())
                .await?,
        );
        Arc::new(MetricsEngine::new(store, node_id.clone(), &metrics_config))
    } else {
        Arc::new(MetricsEngine::disabled(node_id.clone()))
    };

    // A previous incarnation of this node may have crashed while holding
    // entries; it has no live sockets yet, so anything tagged with its id
    // is garbage
    if let Err(e) = metrics.recover_stale_entries().await {
        warn!(error = %e, "Startup metrics cleanup failed");
    }

    if metrics_config.enabled {
        let election: Arc<dyn MasterElection> = Arc::new(
            RedisElection::new(
                &metrics_config.redis_url,
                metrics_config.election_key(),
                node_id.clone(),
                metrics_config.master_lease_secs,
            )
            .await?,
        );
        metrics
            .clone()
            .spawn_aggregation(election, metrics_config.aggregation_interval());
    }

    let state = Arc::new(ServerState::new(
        applications,
        Arc::new(ChannelRegistry::new()),
        metrics.clone(),
        server_config.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr()).await?;
    info!(addr = %server_config.bind_addr(), "Listening for WebSocket connections");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Counts would be permanently wrong if this node's entries survived a
    // graceful stop
    if let Err(e) = metrics.shutdown_cleanup().await {
        error!(error = %e, "Shutdown metrics cleanup failed");
    }
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
