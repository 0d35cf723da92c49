//! Worker scheduler: consumer tasks plus periodic metrics logging.

use std::sync::Arc;
use std::time::Duration;

use pipeline_core::WorkQueue;
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::time::interval;
use tracing::info;

use crate::consumer::{ConsumerWorker, ConsumerWorkerConfig};
use crate::enrichment::{EnrichmentWorker, WritePolicy};

/// Worker scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Consumer tasks sharing the queue
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    /// Deliveries requested per receive
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Deliveries processed at once by one consumer
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Ids of one item processed at once
    #[serde(default = "default_id_concurrency")]
    pub id_concurrency: usize,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Metrics log interval
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_consumers() -> usize {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    8
}

fn default_id_concurrency() -> usize {
    4
}

fn default_idle_backoff_ms() -> u64 {
    250
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumers: default_consumers(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            id_concurrency: default_id_concurrency(),
            write_policy: WritePolicy::default(),
            idle_backoff_ms: default_idle_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn consumer_config(&self) -> ConsumerWorkerConfig {
        ConsumerWorkerConfig {
            batch_size: self.batch_size.max(1),
            concurrency: self.concurrency.max(1),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    queue: Arc<dyn WorkQueue>,
    enrichment: Arc<EnrichmentWorker>,
}

impl WorkerScheduler {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn WorkQueue>,
        enrichment: EnrichmentWorker,
    ) -> Self {
        let enrichment = enrichment
            .with_policy(config.write_policy)
            .with_concurrency(config.id_concurrency);

        Self {
            config,
            queue,
            enrichment: Arc::new(enrichment),
        }
    }

    /// Starts all background workers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        for index in 0..self.config.consumers.max(1) {
            let worker = ConsumerWorker::with_config(
                self.queue.clone(),
                self.enrichment.clone(),
                self.config.consumer_config(),
            );
            handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
            info!(consumer = index, "Consumer worker started");
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_log().await;
        }));

        info!("Background workers started");
        handles
    }

    async fn run_metrics_log(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.metrics_interval_secs.max(1)));

        loop {
            ticker.tick().await;

            let snapshot = metrics().snapshot();
            info!(
                rows_read = snapshot.rows_read,
                items_enqueued = snapshot.items_enqueued,
                items_received = snapshot.items_received,
                items_redelivered = snapshot.items_redelivered,
                records_resolved = snapshot.records_resolved,
                records_failed = snapshot.records_failed,
                records_skipped = snapshot.records_skipped,
                update_conflicts = snapshot.update_conflicts,
                store_errors = snapshot.store_errors,
                lookup_attempts = snapshot.lookup_attempts,
                lookup_retries = snapshot.lookup_retries,
                lookup_latency_mean_ms = snapshot.lookup_latency_mean_ms,
                in_flight = snapshot.in_flight_records,
                "Pipeline metrics"
            );
        }
    }
}
