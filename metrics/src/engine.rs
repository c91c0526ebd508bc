//! Metrics engine
//!
//! Maintains live connection membership and message counts per application
//! in the shared counter store, runs the coordinator-gated aggregation job,
//! and answers the admission checks of the connection handler. Admission
//! always reads the authoritative live record; the aggregated summary only
//! serves administrative readers that tolerate one interval of staleness.
//!
//! Every operation is a no-op returning success when metrics are disabled,
//! and every store round-trip is bounded by the configured timeout.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use sidewinder_core::{Application, BrokerError};

use crate::cluster::MasterElection;
use crate::config::MetricsConfig;
use crate::memory::MemoryCounterStore;
use crate::store::{ConnectionEntry, CounterStore, MetricsSummary};

/// Point-in-time cluster-wide counts for one application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub connections: u64,
    pub messages: u64,
}

/// Cluster-wide connection and message accounting
pub struct MetricsEngine {
    store: Arc<dyn CounterStore>,
    node_id: String,
    enabled: bool,
    op_timeout: Duration,
    admission_fail_open: bool,
}

impl MetricsEngine {
    pub fn new(store: Arc<dyn CounterStore>, node_id: impl Into<String>, config: &MetricsConfig) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            enabled: config.enabled,
            op_timeout: config.op_timeout(),
            admission_fail_open: config.admission_fail_open,
        }
    }

    /// Engine with metrics switched off; every operation is a no-op
    pub fn disabled(node_id: impl Into<String>) -> Self {
        Self {
            store: Arc::new(MemoryCounterStore::new()),
            node_id: node_id.into(),
            enabled: false,
            op_timeout: Duration::from_secs(5),
            admission_fail_open: true,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Bound a store round-trip by the configured timeout
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::StoreError(format!("{} timed out", op))),
        }
    }

    /// Record a newly-admitted connection
    pub async fn connection_opened(
        &self,
        application: &Application,
        peer: &str,
    ) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        let entry = ConnectionEntry::new(&self.node_id, peer);
        self.bounded(
            "add_connection",
            self.store
                .add_connection(&application.app_id, &entry, Self::now()),
        )
        .await
    }

    /// Record a closed connection (idempotent)
    pub async fn connection_closed(
        &self,
        application: &Application,
        peer: &str,
    ) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        let entry = ConnectionEntry::new(&self.node_id, peer);
        self.bounded(
            "remove_connection",
            self.store
                .remove_connection(&application.app_id, &entry, Self::now()),
        )
        .await
    }

    /// Count one message dispatched into one of the application's channels
    pub async fn message_sent(&self, application: &Application) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        self.bounded(
            "incr_messages",
            self.store.incr_messages(&application.app_id, Self::now()),
        )
        .await
    }

    /// Fresh cluster-wide counts from the live record; zero when absent
    pub async fn current_counts(&self, app_id: &str) -> Result<Counts, BrokerError> {
        if !self.enabled {
            return Ok(Counts::default());
        }
        let record = self.bounded("fetch", self.store.fetch(app_id)).await?;
        Ok(match record {
            Some(record) => Counts {
                connections: record.connections.len() as u64,
                messages: record.nb_messages,
            },
            None => Counts::default(),
        })
    }

    /// Admission check: has the application reached its connection limit?
    ///
    /// Store failures degrade per configuration (fail-open admits).
    pub async fn over_connection_limit(&self, application: &Application) -> bool {
        let Some(limit) = application.connection_limit else {
            return false;
        };
        if !self.enabled {
            return false;
        }
        match self.current_counts(&application.app_id).await {
            Ok(counts) => counts.connections >= u64::from(limit),
            Err(e) => {
                warn!(
                    app_id = %application.app_id,
                    error = %e,
                    "Admission check degraded: counter store unavailable"
                );
                !self.admission_fail_open
            }
        }
    }

    /// Publish-time check: has the application reached its message limit?
    pub async fn over_message_limit(&self, application: &Application) -> bool {
        let Some(limit) = application.message_limit else {
            return false;
        };
        if !self.enabled {
            return false;
        }
        match self.current_counts(&application.app_id).await {
            Ok(counts) => counts.messages >= limit,
            Err(e) => {
                warn!(
                    app_id = %application.app_id,
                    error = %e,
                    "Message-limit check degraded: counter store unavailable"
                );
                !self.admission_fail_open
            }
        }
    }

    /// Zero message counters for one application, or all when None
    pub async fn reset_message_counts(&self, app_id: Option<&str>) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        self.bounded(
            "reset_messages",
            self.store.reset_messages(app_id, Self::now()),
        )
        .await?;
        info!(app_id = app_id.unwrap_or("all"), "Reset message counters");
        Ok(())
    }

    /// Startup recovery: this node just started, so any tuple tagged with
    /// its id is garbage left by a previous crash
    pub async fn recover_stale_entries(&self) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        debug!(node_id = %self.node_id, "Cleaning stale metrics work data");
        self.bounded(
            "remove_node",
            self.store.remove_node(&self.node_id, Self::now()),
        )
        .await?;
        info!(node_id = %self.node_id, "Cleaned up stale metrics work data");
        Ok(())
    }

    /// Graceful-shutdown cleanup; must finish (or time out) before exit
    pub async fn shutdown_cleanup(&self) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        debug!(node_id = %self.node_id, "Removing connections from store before stop");
        self.bounded(
            "remove_node",
            self.store.remove_node(&self.node_id, Self::now()),
        )
        .await
    }

    /// One aggregation pass: fold records touched since the watermark into
    /// the per-application summaries, then advance the watermark
    pub async fn aggregate(&self) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        let watermark = self.bounded("watermark", self.store.watermark()).await?;
        let now = Self::now();
        let records = self
            .bounded("records_since", self.store.records_since(watermark))
            .await?;

        for record in records {
            let existing = self
                .bounded("fetch_summary", self.store.fetch_summary(&record.app_id))
                .await?
                .unwrap_or_default();
            let nb_connections = record.connections.len() as u64;
            let summary = MetricsSummary {
                app_id: record.app_id.clone(),
                nb_connections,
                max_nb_connections: existing.max_nb_connections.max(nb_connections),
                nb_messages: existing.nb_messages + record.nb_messages,
                timestamp: now,
            };
            self.bounded("upsert_summary", self.store.upsert_summary(&summary))
                .await?;
        }

        self.bounded("set_watermark", self.store.set_watermark(now))
            .await?;
        debug!(node_id = %self.node_id, "Calculated metrics");
        Ok(())
    }

    /// Aggregated summary for one application (administrative readers)
    pub async fn aggregated_counts(
        &self,
        app_id: &str,
    ) -> Result<Option<MetricsSummary>, BrokerError> {
        if !self.enabled {
            return Ok(None);
        }
        self.bounded("fetch_summary", self.store.fetch_summary(app_id))
            .await
    }

    /// Aggregated summaries for all applications
    pub async fn all_aggregated_counts(&self) -> Result<Vec<MetricsSummary>, BrokerError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.bounded("all_summaries", self.store.all_summaries())
            .await
    }

    /// Spawn the periodic aggregation job; it runs only while this node
    /// holds the coordinator lease, on a code path fully separate from
    /// admission checks
    pub fn spawn_aggregation(
        self: Arc<Self>,
        election: Arc<dyn MasterElection>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately on the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !election.is_master().await {
                    continue;
                }
                if let Err(e) = engine.aggregate().await {
                    error!(error = %e, "Metrics aggregation failed");
                }
            }
        })
    }
}
