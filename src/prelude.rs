//! Convenience re-exports for sidewinder users

pub use sidewinder_config::BrokerConfig;
pub use sidewinder_core::prelude::*;
pub use sidewinder_metrics::{
    generate_node_id, Counts, CounterStore, MasterElection, MemoryCounterStore, MetricsConfig,
    MetricsEngine, RedisCounterStore, RedisElection, StaticElection,
};
pub use sidewinder_server::prelude::*;
