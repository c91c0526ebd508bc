//! Cluster metrics configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the metrics engine and its shared counter store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Master switch; when false every metrics operation is a no-op
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL for the shared counter store
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for all store and election keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Timeout for a single store round-trip (milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Interval between aggregation runs on the coordinator (seconds)
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_secs: u64,

    /// Coordinator lease duration (seconds); must exceed the aggregation
    /// interval or the lease expires between runs
    #[serde(default = "default_master_lease")]
    pub master_lease_secs: u64,

    /// Admit connections when the store is unreachable (fail-open)
    #[serde(default = "default_admission_fail_open")]
    pub admission_fail_open: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
            aggregation_interval_secs: default_aggregation_interval(),
            master_lease_secs: default_master_lease(),
            admission_fail_open: default_admission_fail_open(),
        }
    }
}

impl MetricsConfig {
    /// Create new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable metrics
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the Redis URL
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the store round-trip timeout
    pub fn with_op_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.op_timeout_ms = timeout_ms;
        self
    }

    /// Set the aggregation interval
    pub fn with_aggregation_interval(mut self, secs: u64) -> Self {
        self.aggregation_interval_secs = secs;
        self
    }

    /// Fail admission closed when the store is unreachable
    pub fn with_admission_fail_open(mut self, fail_open: bool) -> Self {
        self.admission_fail_open = fail_open;
        self
    }

    /// Store round-trip timeout as Duration
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Aggregation interval as Duration
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    /// Election lease key under the configured prefix
    pub fn election_key(&self) -> String {
        format!("{}:master", self.key_prefix)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "sidewinder:metrics".to_string()
}

fn default_op_timeout_ms() -> u64 {
    5000
}

fn default_aggregation_interval() -> u64 {
    60
}

fn default_master_lease() -> u64 {
    90
}

fn default_admission_fail_open() -> bool {
    true
}
