//! Consumer worker: pulls work items off the queue and enriches them.
//!
//! Loop:
//! 1. Receive a batch of deliveries
//! 2. Enrich every id of every item
//! 3. Ack items whose ids all settled (at-least-once delivery)
//! 4. Repeat
//!
//! Items with a store failure are left unacked and come back after the
//! queue's visibility timeout.

use crate::enrichment::EnrichmentWorker;
use futures::stream::{self, StreamExt};
use pipeline_core::{Delivery, Result, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tracing::{debug, error, info, warn};

/// Consumer worker configuration.
#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    /// Deliveries requested per receive
    pub batch_size: usize,
    /// Deliveries processed at once
    pub concurrency: usize,
    /// Pause after an empty receive
    pub idle_backoff: Duration,
    /// Pause after a failed receive
    pub error_backoff: Duration,
}

impl Default for ConsumerWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 8,
            idle_backoff: Duration::from_millis(250),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Tally of one receive-process-ack round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub received: usize,
    pub acked: usize,
    pub undecodable: usize,
    pub left_for_redelivery: usize,
}

enum DeliveryResult {
    Acked,
    Undecodable,
    Unsettled,
}

/// Worker that drains the work queue through an [`EnrichmentWorker`].
pub struct ConsumerWorker {
    queue: Arc<dyn WorkQueue>,
    enrichment: Arc<EnrichmentWorker>,
    config: ConsumerWorkerConfig,
}

impl ConsumerWorker {
    pub fn new(queue: Arc<dyn WorkQueue>, enrichment: Arc<EnrichmentWorker>) -> Self {
        Self::with_config(queue, enrichment, ConsumerWorkerConfig::default())
    }

    pub fn with_config(
        queue: Arc<dyn WorkQueue>,
        enrichment: Arc<EnrichmentWorker>,
        config: ConsumerWorkerConfig,
    ) -> Self {
        Self {
            queue,
            enrichment,
            config,
        }
    }

    /// Main run loop. Runs until the task is aborted.
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            policy = ?self.enrichment.policy(),
            "Consumer worker starting"
        );

        loop {
            match self.run_once().await {
                Ok(round) if round.received == 0 => {
                    tokio::time::sleep(self.config.idle_backoff).await;
                }
                Ok(round) => {
                    debug!(
                        received = round.received,
                        acked = round.acked,
                        left_for_redelivery = round.left_for_redelivery,
                        "Processed batch"
                    );
                }
                Err(e) => {
                    error!("Receive error: {}", e);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }
    }

    /// One round: receive, process, ack.
    pub async fn run_once(&self) -> Result<RoundReport> {
        let deliveries = self.queue.receive(self.config.batch_size).await?;

        let mut round = RoundReport {
            received: deliveries.len(),
            ..RoundReport::default()
        };
        if deliveries.is_empty() {
            return Ok(round);
        }
        metrics().items_received.inc_by(deliveries.len() as u64);

        let results: Vec<DeliveryResult> = stream::iter(deliveries)
            .map(|delivery| self.handle(delivery))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                DeliveryResult::Acked => round.acked += 1,
                DeliveryResult::Undecodable => {
                    round.acked += 1;
                    round.undecodable += 1;
                }
                DeliveryResult::Unsettled => round.left_for_redelivery += 1,
            }
        }

        Ok(round)
    }

    async fn handle(&self, delivery: Delivery) -> DeliveryResult {
        if delivery.attempt > 1 {
            metrics().items_redelivered.inc();
            debug!(
                receipt = %delivery.receipt,
                attempt = delivery.attempt,
                "Redelivered work item"
            );
        }

        let item = match delivery.work_item() {
            Ok(item) => item,
            Err(e) => {
                warn!(
                    receipt = %delivery.receipt,
                    error = %e,
                    payload = %String::from_utf8_lossy(&delivery.payload),
                    "Dropping undecodable work item"
                );
                metrics().undecodable_items.inc();
                return if self.ack(&delivery).await {
                    DeliveryResult::Undecodable
                } else {
                    DeliveryResult::Unsettled
                };
            }
        };

        let report = self.enrichment.process_item(&item).await;
        if !report.is_settled() {
            warn!(
                receipt = %delivery.receipt,
                attempt = delivery.attempt,
                store_errors = report.store_errors,
                "Work item not settled, leaving it for redelivery"
            );
            return DeliveryResult::Unsettled;
        }

        if self.ack(&delivery).await {
            DeliveryResult::Acked
        } else {
            DeliveryResult::Unsettled
        }
    }

    async fn ack(&self, delivery: &Delivery) -> bool {
        match self.queue.ack(&delivery.receipt).await {
            Ok(()) => {
                metrics().items_acked.inc();
                true
            }
            Err(e) => {
                error!(receipt = %delivery.receipt, error = %e, "Failed to ack work item");
                false
            }
        }
    }
}
