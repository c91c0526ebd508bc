//! In-memory counter store
//!
//! Backs tests and single-node deployments that run without Redis. Shares
//! the trait's idempotence contract with the Redis implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use sidewinder_core::BrokerError;

use crate::store::{ConnectionEntry, CounterStore, MetricsRecord, MetricsSummary};

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, MetricsRecord>,
    summaries: HashMap<String, MetricsSummary>,
    watermark: i64,
}

/// Counter store held entirely in process memory
#[derive(Default)]
pub struct MemoryCounterStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn record_mut(&mut self, app_id: &str) -> &mut MetricsRecord {
        self.records
            .entry(app_id.to_string())
            .or_insert_with(|| MetricsRecord {
                app_id: app_id.to_string(),
                ..MetricsRecord::default()
            })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn add_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let record = state.record_mut(app_id);
        if !record.connections.contains(entry) {
            record.connections.push(entry.clone());
        }
        record.timestamp = timestamp;
        Ok(())
    }

    async fn remove_connection(
        &self,
        app_id: &str,
        entry: &ConnectionEntry,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let record = state.record_mut(app_id);
        record.connections.retain(|existing| existing != entry);
        record.timestamp = timestamp;
        Ok(())
    }

    async fn remove_node(&self, node_id: &str, timestamp: i64) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        for record in state.records.values_mut() {
            let before = record.connections.len();
            record.connections.retain(|entry| entry.node_id != node_id);
            if record.connections.len() != before {
                record.timestamp = timestamp;
            }
        }
        Ok(())
    }

    async fn incr_messages(&self, app_id: &str, timestamp: i64) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let record = state.record_mut(app_id);
        record.nb_messages += 1;
        record.timestamp = timestamp;
        Ok(())
    }

    async fn reset_messages(
        &self,
        app_id: Option<&str>,
        timestamp: i64,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        match app_id {
            Some(app_id) => {
                let record = state.record_mut(app_id);
                record.nb_messages = 0;
                record.timestamp = timestamp;
            }
            None => {
                for record in state.records.values_mut() {
                    record.nb_messages = 0;
                    record.timestamp = timestamp;
                }
            }
        }
        Ok(())
    }

    async fn fetch(&self, app_id: &str) -> Result<Option<MetricsRecord>, BrokerError> {
        let state = self.state.read().await;
        Ok(state.records.get(app_id).cloned())
    }

    async fn records_since(&self, watermark: i64) -> Result<Vec<MetricsRecord>, BrokerError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|record| record.timestamp >= watermark)
            .cloned()
            .collect())
    }

    async fn watermark(&self) -> Result<i64, BrokerError> {
        Ok(self.state.read().await.watermark)
    }

    async fn set_watermark(&self, timestamp: i64) -> Result<(), BrokerError> {
        self.state.write().await.watermark = timestamp;
        Ok(())
    }

    async fn upsert_summary(&self, summary: &MetricsSummary) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        state
            .summaries
            .insert(summary.app_id.clone(), summary.clone());
        Ok(())
    }

    async fn fetch_summary(&self, app_id: &str) -> Result<Option<MetricsSummary>, BrokerError> {
        let state = self.state.read().await;
        Ok(state.summaries.get(app_id).cloned())
    }

    async fn all_summaries(&self) -> Result<Vec<MetricsSummary>, BrokerError> {
        let state = self.state.read().await;
        Ok(state.summaries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_connection_is_idempotent() {
        let store = MemoryCounterStore::new();
        let entry = ConnectionEntry::new("node-1", "10.0.0.1:4242");

        store.add_connection("1", &entry, 100).await.unwrap();
        store.add_connection("1", &entry, 101).await.unwrap();

        let record = store.fetch("1").await.unwrap().unwrap();
        assert_eq!(record.connections.len(), 1);
        assert_eq!(record.timestamp, 101);
    }

    #[tokio::test]
    async fn test_remove_connection_never_underflows() {
        let store = MemoryCounterStore::new();
        let entry = ConnectionEntry::new("node-1", "10.0.0.1:4242");

        store.add_connection("1", &entry, 100).await.unwrap();
        store.remove_connection("1", &entry, 101).await.unwrap();
        store.remove_connection("1", &entry, 102).await.unwrap();

        let record = store.fetch("1").await.unwrap().unwrap();
        assert!(record.connections.is_empty());
    }

    #[tokio::test]
    async fn test_remove_node_spans_applications() {
        let store = MemoryCounterStore::new();
        store
            .add_connection("1", &ConnectionEntry::new("node-1", "10.0.0.1:1"), 100)
            .await
            .unwrap();
        store
            .add_connection("2", &ConnectionEntry::new("node-1", "10.0.0.1:2"), 100)
            .await
            .unwrap();
        store
            .add_connection("2", &ConnectionEntry::new("node-2", "10.0.0.2:3"), 100)
            .await
            .unwrap();

        store.remove_node("node-1", 200).await.unwrap();

        assert!(store.fetch("1").await.unwrap().unwrap().connections.is_empty());
        let survivors = store.fetch("2").await.unwrap().unwrap().connections;
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].node_id, "node-2");
    }

    #[tokio::test]
    async fn test_records_since_filters_on_timestamp() {
        let store = MemoryCounterStore::new();
        store.incr_messages("old", 50).await.unwrap();
        store.incr_messages("new", 150).await.unwrap();

        let records = store.records_since(100).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].app_id, "new");
    }
}
