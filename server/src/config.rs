//! WebSocket server configuration

use serde::{Deserialize, Serialize};

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Activity timeout advertised in `pusher:connection_established` (seconds)
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            activity_timeout_secs: default_activity_timeout(),
        }
    }
}

impl ServerConfig {
    /// Create new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the advertised activity timeout
    pub fn with_activity_timeout(mut self, secs: u64) -> Self {
        self.activity_timeout_secs = secs;
        self
    }

    /// Bind address as `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_activity_timeout() -> u64 {
    120
}
