//! Cluster metrics scenario tests
//!
//! Several engines sharing one counter store stand in for several broker
//! nodes sharing Redis.

use std::sync::Arc;

use sidewinder::{
    Application, ConnectionEntry, CounterStore, MemoryCounterStore, MetricsConfig, MetricsEngine,
};

fn engine(store: Arc<MemoryCounterStore>, node_id: &str) -> MetricsEngine {
    MetricsEngine::new(store, node_id, &MetricsConfig::default().with_enabled(true))
}

fn app() -> Application {
    Application::new("1", "app-key", "app-secret")
}

#[tokio::test]
async fn test_counts_accumulate_across_nodes() {
    let store = Arc::new(MemoryCounterStore::new());
    let node1 = engine(store.clone(), "node-1");
    let node2 = engine(store.clone(), "node-2");
    let application = app();

    node1
        .connection_opened(&application, "10.0.0.1:1")
        .await
        .unwrap();
    node2
        .connection_opened(&application, "10.0.0.2:1")
        .await
        .unwrap();
    node1.message_sent(&application).await.unwrap();
    node2.message_sent(&application).await.unwrap();
    node2.message_sent(&application).await.unwrap();

    // Both nodes observe the same cluster-wide counts
    let counts = node1.current_counts("1").await.unwrap();
    assert_eq!(counts.connections, 2);
    assert_eq!(counts.messages, 3);
    assert_eq!(node2.current_counts("1").await.unwrap(), counts);
}

#[tokio::test]
async fn test_crashed_node_entries_swept_on_restart() {
    let store = Arc::new(MemoryCounterStore::new());
    let node1 = engine(store.clone(), "node-1");
    let node2 = engine(store.clone(), "node-2");
    let application = app();

    node1
        .connection_opened(&application, "10.0.0.1:1")
        .await
        .unwrap();
    node2
        .connection_opened(&application, "10.0.0.2:1")
        .await
        .unwrap();

    // node-2 crashes without cleanup, then restarts: it cannot have live
    // sockets yet, so startup recovery removes exactly its entries
    let restarted = engine(store.clone(), "node-2");
    restarted.recover_stale_entries().await.unwrap();

    let counts = node1.current_counts("1").await.unwrap();
    assert_eq!(counts.connections, 1);
}

#[tokio::test]
async fn test_graceful_shutdown_removes_own_entries() {
    let store = Arc::new(MemoryCounterStore::new());
    let node1 = engine(store.clone(), "node-1");
    let node2 = engine(store.clone(), "node-2");
    let application = app();

    node1
        .connection_opened(&application, "10.0.0.1:1")
        .await
        .unwrap();
    node1
        .connection_opened(&application, "10.0.0.1:2")
        .await
        .unwrap();
    node2
        .connection_opened(&application, "10.0.0.2:1")
        .await
        .unwrap();

    node1.shutdown_cleanup().await.unwrap();

    let counts = node2.current_counts("1").await.unwrap();
    assert_eq!(counts.connections, 1);
}

#[tokio::test]
async fn test_reset_scopes_to_one_or_all_applications() {
    let store = Arc::new(MemoryCounterStore::new());
    let node = engine(store.clone(), "node-1");
    let first = app();
    let second = Application::new("2", "other-key", "other-secret");

    node.message_sent(&first).await.unwrap();
    node.message_sent(&second).await.unwrap();
    node.message_sent(&second).await.unwrap();

    node.reset_message_counts(Some("2")).await.unwrap();
    assert_eq!(node.current_counts("1").await.unwrap().messages, 1);
    assert_eq!(node.current_counts("2").await.unwrap().messages, 0);

    node.reset_message_counts(None).await.unwrap();
    assert_eq!(node.current_counts("1").await.unwrap().messages, 0);
}

#[tokio::test]
async fn test_aggregation_respects_the_watermark() {
    let store = Arc::new(MemoryCounterStore::new());

    // Two records, one stale and one fresh relative to the watermark
    store
        .add_connection("stale", &ConnectionEntry::new("node-1", "10.0.0.1:1"), 100)
        .await
        .unwrap();
    store
        .add_connection("fresh", &ConnectionEntry::new("node-1", "10.0.0.1:2"), 200)
        .await
        .unwrap();
    store.set_watermark(150).await.unwrap();

    let node = engine(store.clone(), "node-1");
    node.aggregate().await.unwrap();

    // Only the record touched since the watermark is folded
    assert!(node.aggregated_counts("stale").await.unwrap().is_none());
    let summary = node.aggregated_counts("fresh").await.unwrap().unwrap();
    assert_eq!(summary.nb_connections, 1);

    // The watermark advanced past both records
    assert!(store.watermark().await.unwrap() > 200);
}

#[tokio::test]
async fn test_summary_keeps_running_maximum() {
    let store = Arc::new(MemoryCounterStore::new());
    let node = engine(store.clone(), "node-1");
    let application = app();

    for port in 1..=3 {
        node.connection_opened(&application, &format!("10.0.0.1:{}", port))
            .await
            .unwrap();
    }
    node.aggregate().await.unwrap();

    node.connection_closed(&application, "10.0.0.1:1")
        .await
        .unwrap();
    node.connection_closed(&application, "10.0.0.1:2")
        .await
        .unwrap();
    node.aggregate().await.unwrap();

    let summary = node.aggregated_counts("1").await.unwrap().unwrap();
    assert_eq!(summary.nb_connections, 1);
    assert_eq!(summary.max_nb_connections, 3);

    // Admission keeps reading the live record, not the summary
    assert_eq!(node.current_counts("1").await.unwrap().connections, 1);
}
