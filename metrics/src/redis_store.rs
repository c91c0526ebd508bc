//! Redis-backed counter store
//!
//! Layout under a configurable key prefix:
//! `{p}:apps` set of known app ids, `{p}:connections:{app}` set of
//! `node_id|peer` tuples, `{p}:messages:{app}` counter,
//! `{p}:timestamp:{app}` last update, `{p}:last_timestamp` aggregation
//! watermark, `{p}:summary:{app}` hash of aggregated fields.
//!
//! Timeouts are the caller's concern: the engine bounds every round-trip.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::info;

use sidewinder_core::BrokerError;

use crate::store::{ConnectionEntry, CounterStore, MetricsRecord, MetricsSummary};

/// Counter store backed by a shared Redis instance
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    prefix: String,
}

fn redis_err(op: &str, e: redis::RedisError) -> BrokerError {
    BrokerError::StoreError(format!("Redis {} failed: {}", op, e))
}

fn encode_entry(entry: &ConnectionEntry) -> String {
    // peer is `ip:port`, so the separator must not be a colon
    format!("{}|{}", entry.node_id, entry.peer)
}

fn decode_entry(raw: &str) -> Option<ConnectionEntry> {
    let (node_id, peer) = raw.split_once('|')?;
    Some(ConnectionEntry::new(node_id, peer))
}

impl RedisCounterStore {
    /// Connect to Redis and return a store rooted at the given key prefix
    pub async fn new(url: &str, prefix: impl Into<String>) -> Result<Self, BrokerError> {
        let client = Client::open(url)
            .map_err(|e| BrokerError::StoreError(format!("Redis connection failed: {}", e)))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::StoreError(format!("Redis connection failed: {}", e)))?;

        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            connection,
            prefix: prefix.into(),
        })
    }

    fn apps_key(&self) -> String {
        format!("{}:apps", self.prefix)
    }

    fn connections_key(&self, app_id: &str) -> String {
        format!("{}:connections:{}", self.prefix, app_id)
    }

    fn messages_key(&self, app_id: &str) -> String {
        format!("{}:messages:{}", self.prefix, app_id)
    }

    fn timestamp_key(&self, app_id: &str) -> String {
        format!("{}:timestamp:{}", self.prefix, app_id)
    }

    fn watermark_key(&self) -> String {
        format!("{}:last_timestamp", self.prefix)
    }

    fn summary_key(&self, app_id: &str) -> String {
        format!("{}:summary:{}", self.prefix, app_id)
    }

    async fn known_apps(&self) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.connection.clone();
        conn.smembers(self.apps_key())
            .await
            .map_err(|e| redis_err("SMEMBERS", e))
    }

    async fn touch(&self, app_id: &str, timestamp: i64) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .sadd(self.apps_key(), app_id)
            .await
            .map_err(|e| redis_err("SADD", e))?;
        let _: () = conn
            .set(self.timestamp_key(app_id), timestamp)
            .await
            .map_err(|e| redis_err("SET", e))?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn add_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .sadd(self.connections_key(app_id), encode_entry(entry))
            .await
            .map_err(|e| redis_err("SADD", e))?;
        self.touch(app_id, timestamp).await
    }

    async fn remove_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .srem(self.connections_key(app_id), encode_entry(entry))
            .await
            .map_err(|e| redis_err("SREM", e))?;
        self.touch(app_id, timestamp).await
    }

    async fn remove_node(&self, node_id: &str, timestamp: i64) -> Result<(), BrokerError> {
        let node_prefix = format!("{}|", node_id);
        let mut conn = self.connection.clone();

        for app_id in self.known_apps().await? {
            let key = self.connections_key(&app_id);
            let members: Vec<String> = conn
                .smembers(&key)
                .await
                .map_err(|e| redis_err("SMEMBERS", e))?;
            let stale: Vec<String> = members
                .into_iter()
                .filter(|member| member.starts_with(&node_prefix))
                .collect();
            if stale.is_empty() {
                continue;
            }
            let _: () = conn
                .srem(&key, stale)
                .await
                .map_err(|e| redis_err("SREM", e))?;
            self.touch(&app_id, timestamp).await?;
        }

        Ok(())
    }

    async fn incr_messages(&self, app_id: &str, timestamp: i64) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .incr(self.messages_key(app_id), 1i64)
            .await
            .map_err(|e| redis_err("INCR", e))?;
        self.touch(app_id, timestamp).await
    }

    async fn reset_messages(
        &self,
        app_id: Option<&str>,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let app_ids = match app_id {
            Some(app_id) => vec![app_id.to_string()],
            None => self.known_apps().await?,
        };

        let mut conn = self.connection.clone();
        for app_id in app_ids {
            let _: () = conn
                .set(self.messages_key(&app_id), 0i64)
                .await
                .map_err(|e| redis_err("SET", e))?;
            self.touch(&app_id, timestamp).await?;
        }
        Ok(())
    }

    async fn fetch(&self, app_id: &str) -> Result<Option<MetricsRecord>, BrokerError> {
        let mut conn = self.connection.clone();
        let known: bool = conn
            .sismember(self.apps_key(), app_id)
            .await
            .map_err(|e| redis_err("SISMEMBER", e))?;
        if !known {
            return Ok(None);
        }

        let members: Vec<String> = conn
            .smembers(self.connections_key(app_id))
            .await
            .map_err(|e| redis_err("SMEMBERS", e))?;
        let nb_messages: Option<u64> = conn
            .get(self.messages_key(app_id))
            .await
            .map_err(|e| redis_err("GET", e))?;
        let timestamp: Option<i64> = conn
            .get(self.timestamp_key(app_id))
            .await
            .map_err(|e| redis_err("GET", e))?;

        Ok(Some(MetricsRecord {
            app_id: app_id.to_string(),
            connections: members.iter().filter_map(|m| decode_entry(m)).collect(),
            nb_messages: nb_messages.unwrap_or(0),
            timestamp: timestamp.unwrap_or(0),
        }))
    }

    async fn records_since(&self, watermark: i64) -> Result<Vec<MetricsRecord>, BrokerError> {
        let mut records = Vec::new();
        for app_id in self.known_apps().await? {
            if let Some(record) = self.fetch(&app_id).await? {
                if record.timestamp >= watermark {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn watermark(&self) -> Result<i64, BrokerError> {
        let mut conn = self.connection.clone();
        let watermark: Option<i64> = conn
            .get(self.watermark_key())
            .await
            .map_err(|e| redis_err("GET", e))?;
        Ok(watermark.unwrap_or(0))
    }

    async fn set_watermark(&self, timestamp: i64) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set(self.watermark_key(), timestamp)
            .await
            .map_err(|e| redis_err("SET", e))?;
        Ok(())
    }

    async fn upsert_summary(&self, summary: &MetricsSummary) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .sadd(self.apps_key(), &summary.app_id)
            .await
            .map_err(|e| redis_err("SADD", e))?;
        let fields: Vec<(&str, String)> = vec![
            ("nb_connections", summary.nb_connections.to_string()),
            ("max_nb_connections", summary.max_nb_connections.to_string()),
            ("nb_messages", summary.nb_messages.to_string()),
            ("timestamp", summary.timestamp.to_string()),
        ];
        let _: () = conn
            .hset_multiple(self.summary_key(&summary.app_id), &fields)
            .await
            .map_err(|e| redis_err("HSET", e))?;
        Ok(())
    }

    async fn fetch_summary(&self, app_id: &str) -> Result<Option<MetricsSummary>, BrokerError> {
        let mut conn = self.connection.clone();
        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(self.summary_key(app_id))
            .await
            .map_err(|e| redis_err("HGETALL", e))?;
        if fields.is_empty() {
            return Ok(None);
        }

        let parse = |name: &str| {
            fields
                .get(name)
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0)
        };
        Ok(Some(MetricsSummary {
            app_id: app_id.to_string(),
            nb_connections: parse("nb_connections"),
            max_nb_connections: parse("max_nb_connections"),
            nb_messages: parse("nb_messages"),
            timestamp: fields
                .get("timestamp")
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(0),
        }))
    }

    async fn all_summaries(&self) -> Result<Vec<MetricsSummary>, BrokerError> {
        let mut summaries = Vec::new();
        for app_id in self.known_apps().await? {
            if let Some(summary) = self.fetch_summary(&app_id).await? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_encoding_round_trip() {
        let entry = ConnectionEntry::new("node-1", "10.0.0.1:4242");
        let decoded = decode_entry(&encode_entry(&entry)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_malformed_members() {
        assert!(decode_entry("no-separator").is_none());
    }
}
