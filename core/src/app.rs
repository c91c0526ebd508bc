//! Application model and registry
//!
//! An application is a tenant of the broker, identified by a public key and
//! a shared secret, with optional cluster-wide connection and message limits.
//! The core only ever reads applications; mutation belongs to the
//! administrative REST layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registered application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Application identifier
    pub app_id: String,
    /// Public key embedded in client connection URLs
    pub key: String,
    /// Shared secret used to sign private/presence subscriptions
    pub secret: String,
    /// Cluster-wide cap on live connections (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_limit: Option<u32>,
    /// Cluster-wide cap on messages since the last reset (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_limit: Option<u64>,
}

impl Application {
    pub fn new(
        app_id: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            key: key.into(),
            secret: secret.into(),
            connection_limit: None,
            message_limit: None,
        }
    }

    /// Set the connection limit
    pub fn with_connection_limit(mut self, limit: u32) -> Self {
        self.connection_limit = Some(limit);
        self
    }

    /// Set the message limit
    pub fn with_message_limit(mut self, limit: u64) -> Self {
        self.message_limit = Some(limit);
        self
    }
}

/// Read-only application lookup consumed by the connection handler
#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    /// Find an application by its public key
    async fn find_by_key(&self, key: &str) -> Option<Arc<Application>>;

    /// Find an application by its id
    async fn find_by_id(&self, app_id: &str) -> Option<Arc<Application>>;
}

/// In-memory registry backing tests and single-process deployments
pub struct MemoryApplicationRegistry {
    apps: RwLock<HashMap<String, Arc<Application>>>,
}

impl MemoryApplicationRegistry {
    pub fn new() -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Register an application, replacing any previous one with the same key
    pub async fn insert(&self, application: Application) {
        let mut apps = self.apps.write().await;
        apps.insert(application.key.clone(), Arc::new(application));
    }
}

impl Default for MemoryApplicationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationRegistry for MemoryApplicationRegistry {
    async fn find_by_key(&self, key: &str) -> Option<Arc<Application>> {
        let apps = self.apps.read().await;
        apps.get(key).cloned()
    }

    async fn find_by_id(&self, app_id: &str) -> Option<Arc<Application>> {
        let apps = self.apps.read().await;
        apps.values().find(|app| app.app_id == app_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_key_and_id() {
        let registry = MemoryApplicationRegistry::new();
        registry
            .insert(Application::new("1", "app-key", "app-secret").with_connection_limit(5))
            .await;

        let by_key = registry.find_by_key("app-key").await.unwrap();
        assert_eq!(by_key.app_id, "1");
        assert_eq!(by_key.connection_limit, Some(5));

        let by_id = registry.find_by_id("1").await.unwrap();
        assert_eq!(by_id.key, "app-key");

        assert!(registry.find_by_key("missing").await.is_none());
        assert!(registry.find_by_id("42").await.is_none());
    }
}
