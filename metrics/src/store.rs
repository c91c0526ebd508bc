//! Counter store abstraction
//!
//! The store is the only cross-node shared mutable resource. Every mutation
//! is an idempotent set operation or an atomic increment so concurrent
//! updates from different nodes commute without cross-node locking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sidewinder_core::BrokerError;

/// One live connection as seen by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Id of the node holding the socket
    pub node_id: String,
    /// Peer address (`ip:port`) of the socket
    pub peer: String,
}

impl ConnectionEntry {
    pub fn new(node_id: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            peer: peer.into(),
        }
    }
}

/// Live per-application record: the authoritative set admission reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub app_id: String,
    /// Currently-open connections across the whole cluster; a given
    /// `{node_id, peer}` tuple appears at most once
    pub connections: Vec<ConnectionEntry>,
    /// Messages dispatched since the last reset
    pub nb_messages: u64,
    /// Last-update timestamp (unix seconds)
    pub timestamp: i64,
}

/// Derived per-application summary maintained by the aggregation job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub app_id: String,
    /// Connection count of the most recent folded snapshot
    pub nb_connections: u64,
    /// Running maximum observed connection count
    pub max_nb_connections: u64,
    /// Cumulative message total across folds
    pub nb_messages: u64,
    pub timestamp: i64,
}

/// Crash-tolerant shared counter store reachable by every node
///
/// Mirrors the update operators of a document store: idempotent set
/// add/remove, multi-record removal by node, atomic increment, and an
/// upserted summary collection plus a single watermark record.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add a connection tuple to an application's record (idempotent),
    /// refreshing its timestamp; the record is created if missing
    async fn add_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError>;

    /// Remove a connection tuple (idempotent), refreshing the timestamp
    async fn remove_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError>;

    /// Remove every connection tuple tagged with this node id across all
    /// applications (startup recovery and graceful shutdown)
    async fn remove_node(&self, node_id: &str, timestamp: i64) -> Result<(), BrokerError>;

    /// Atomically increment an application's message counter
    async fn incr_messages(&self, app_id: &str, timestamp: i64) -> Result<(), BrokerError>;

    /// Zero the message counter of one application, or of all when None
    async fn reset_messages(
        &self,
        app_id: Option<&str>,
        timestamp: i64,
    ) -> Result<(), BrokerError>;

    /// Point-in-time read of one application's live record
    async fn fetch(&self, app_id: &str) -> Result<Option<MetricsRecord>, BrokerError>;

    /// Records updated at or after the given watermark
    async fn records_since(&self, watermark: i64) -> Result<Vec<MetricsRecord>, BrokerError>;

    /// Aggregation watermark (0 when never set)
    async fn watermark(&self) -> Result<i64, BrokerError>;

    async fn set_watermark(&self, timestamp: i64) -> Result<(), BrokerError>;

    /// Upsert a derived summary
    async fn upsert_summary(&self, summary: &MetricsSummary) -> Result<(), BrokerError>;

    async fn fetch_summary(&self, app_id: &str) -> Result<Option<MetricsSummary>, BrokerError>;

    async fn all_summaries(&self) -> Result<Vec<MetricsSummary>, BrokerError>;
}
