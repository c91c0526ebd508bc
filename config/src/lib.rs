//! Configuration module for the sidewinder broker
//!
//! This module only contains the unified BrokerConfig. Subsystem
//! configurations (WebSocket server, cluster metrics) live in their
//! respective crates and are deserialized from the raw sections here.

use serde::{Deserialize, Serialize};
use sidewinder_core::Application;

/// Unified broker configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    /// Applications registered at startup (the administrative REST layer
    /// can add more at runtime)
    #[serde(default)]
    pub applications: Vec<Application>,

    /// WebSocket server configuration section (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<serde_json::Value>,

    /// Cluster metrics configuration section (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl BrokerConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = BrokerConfig::from_json("{}").unwrap();
        assert!(config.applications.is_empty());
        assert!(config.websocket.is_none());
        assert!(config.metrics.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"{
            "applications": [
                {"app_id": "1", "key": "app-key", "secret": "app-secret", "connection_limit": 10}
            ],
            "websocket": {"port": 9000},
            "metrics": {"enabled": true, "redis_url": "redis://localhost:6379"}
        }"#;
        let config = BrokerConfig::from_json(raw).unwrap();
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.applications[0].connection_limit, Some(10));
        assert!(config.websocket.is_some());
        assert!(config.metrics.is_some());
    }
}
