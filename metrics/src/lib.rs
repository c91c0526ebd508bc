//! Cluster-wide connection and message metrics for the sidewinder broker
//!
//! Every node records its own live connections and dispatched messages in a
//! shared counter store; the elected coordinator periodically folds them
//! into per-application summaries. Admission checks read the live records
//! directly — fresher and independent of aggregation lag.

pub mod cluster;
pub mod config;
pub mod engine;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use cluster::{generate_node_id, MasterElection, RedisElection, StaticElection};
pub use config::MetricsConfig;
pub use engine::{Counts, MetricsEngine};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{ConnectionEntry, CounterStore, MetricsRecord, MetricsSummary};
