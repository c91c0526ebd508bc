//! Cluster node identity and coordinator election
//!
//! Each process mints one node id at startup; the elected coordinator is
//! the only node running periodic aggregation. Brief dual-execution during
//! lease handover is tolerable because aggregation is idempotent per
//! watermark.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::warn;
use uuid::Uuid;

use sidewinder_core::BrokerError;

/// Mint a process-wide node id
pub fn generate_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Single-writer election: is this node the coordinator right now?
#[async_trait]
pub trait MasterElection: Send + Sync {
    async fn is_master(&self) -> bool;
}

/// Fixed election answer for single-node deployments and tests
pub struct StaticElection {
    master: bool,
}

impl StaticElection {
    pub fn new(master: bool) -> Self {
        Self { master }
    }
}

#[async_trait]
impl MasterElection for StaticElection {
    async fn is_master(&self) -> bool {
        self.master
    }
}

/// Lease-based election on a shared Redis key
///
/// `SET key node_id NX EX lease` acquires; the holder refreshes the lease on
/// every check. Election failures answer false so aggregation is skipped
/// rather than run concurrently.
pub struct RedisElection {
    connection: MultiplexedConnection,
    key: String,
    node_id: String,
    lease_secs: u64,
}

impl RedisElection {
    pub async fn new(
        url: &str,
        key: impl Into<String>,
        node_id: impl Into<String>,
        lease_secs: u64,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::StoreError(format!("Redis connection failed: {}", e)))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::StoreError(format!("Redis connection failed: {}", e)))?;
        Ok(Self {
            connection,
            key: key.into(),
            node_id: node_id.into(),
            lease_secs,
        })
    }

    async fn try_acquire(&self) -> Result<bool, redis::RedisError> {
        let mut conn = self.connection.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.node_id)
            .arg("NX")
            .arg("EX")
            .arg(self.lease_secs)
            .query_async(&mut conn)
            .await?;
        if acquired.is_some() {
            return Ok(true);
        }

        let holder: Option<String> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        if holder.as_deref() == Some(self.node_id.as_str()) {
            // Still the holder; refresh the lease
            let _: () = redis::cmd("EXPIRE")
                .arg(&self.key)
                .arg(self.lease_secs)
                .query_async(&mut conn)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl MasterElection for RedisElection {
    async fn is_master(&self) -> bool {
        match self.try_acquire().await {
            Ok(master) => master,
            Err(e) => {
                warn!(error = %e, "Master election check failed; skipping coordinator duties");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_election() {
        assert!(StaticElection::new(true).is_master().await);
        assert!(!StaticElection::new(false).is_master().await);
    }

    #[test]
    fn test_node_ids_are_unique() {
        assert_ne!(generate_node_id(), generate_node_id());
    }
}
