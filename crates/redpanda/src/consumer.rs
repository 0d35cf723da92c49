//! Work item consumer with visibility-timeout redelivery.
//!
//! Kafka has no per-message visibility, so it is emulated here:
//! - every fetched record is tracked in memory until it is acknowledged
//! - a delivered record is hidden until its deadline, then handed out again
//! - the committed position advances only over the contiguous acked prefix
//!
//! rskafka has no consumer-group offset API, so the committed position lives
//! in the process. A restarted consumer resumes from the configured start
//! offset and relies on the record store to make replays no-ops. A fetch
//! position that falls out of the retained range resumes at the earliest
//! retained offset, never the latest.

use crate::config::{RedpandaConfig, StartOffset};
use crate::connection;
use pipeline_core::{Delivery, Error, Receipt, Result};
use rskafka::client::error::{Error as ClientError, ProtocolError};
use rskafka::client::partition::{OffsetAt, PartitionClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::health;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct InFlight {
    payload: Vec<u8>,
    attempts: u32,
    /// `None` until first delivered
    invisible_until: Option<Instant>,
}

/// Offset bookkeeping, kept apart from the network code.
#[derive(Debug, Default)]
struct ConsumerState {
    /// Next offset to fetch; `None` until resolved from the start offset
    next_offset: Option<i64>,
    /// Every offset below this one has been acknowledged
    committed: Option<i64>,
    in_flight: BTreeMap<i64, InFlight>,
}

impl ConsumerState {
    /// Hands out up to `max` visible records, oldest first.
    fn take_visible(&mut self, max: usize, now: Instant, timeout: Duration) -> Vec<Delivery> {
        self.in_flight
            .iter_mut()
            .filter(|(_, m)| m.invisible_until.map_or(true, |until| until <= now))
            .take(max)
            .map(|(offset, m)| {
                m.attempts += 1;
                m.invisible_until = Some(now + timeout);
                Delivery {
                    receipt: Receipt::for_delivery(offset, m.attempts),
                    payload: m.payload.clone(),
                    attempt: m.attempts,
                }
            })
            .collect()
    }

    /// Tracks freshly fetched records and advances the fetch position.
    fn track_fetched(
        &mut self,
        from: i64,
        records: impl IntoIterator<Item = (i64, Option<Vec<u8>>)>,
    ) {
        let mut next = from;
        for (offset, value) in records {
            if offset < from {
                continue;
            }
            next = next.max(offset + 1);
            match value {
                Some(payload) => {
                    self.in_flight.entry(offset).or_insert(InFlight {
                        payload,
                        attempts: 0,
                        invisible_until: None,
                    });
                }
                None => debug!(offset = offset, "Skipping record without value"),
            }
        }
        self.next_offset = Some(next);
    }

    /// Returns whether the receipt matched the current delivery.
    fn ack(&mut self, offset: i64, attempt: u32) -> bool {
        match self.in_flight.get(&offset) {
            Some(m) if m.attempts == attempt => {
                self.in_flight.remove(&offset);
                true
            }
            _ => false,
        }
    }

    /// Smallest offset not yet acknowledged.
    fn low_watermark(&self) -> Option<i64> {
        self.in_flight.keys().next().copied().or(self.next_offset)
    }

    /// Moves the committed position up to the low watermark. Returns the new
    /// position when it moved.
    fn advance_commit(&mut self) -> Option<i64> {
        let watermark = self.low_watermark()?;
        if self.committed.map_or(true, |c| watermark > c) {
            self.committed = Some(watermark);
            return Some(watermark);
        }
        None
    }
}

/// Consumer reading work items from partition 0 of the work topic.
pub struct Consumer {
    config: RedpandaConfig,
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    /// Serializes fetches so concurrent receivers never read the same range
    fetch_lock: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<ConsumerState>,
}

impl Consumer {
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            topic = %config.topic,
            start_from = ?config.consumer.start_from,
            visibility_timeout_secs = config.consumer.visibility_timeout_secs,
            "Creating Redpanda consumer"
        );

        Self {
            config,
            partition_client: RwLock::new(None),
            fetch_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(ConsumerState::default()),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.config.consumer.visibility_timeout_secs)
    }

    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.partition_client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let partition_client = connection::partition_client(&self.config).await?;

        {
            let mut client = self.partition_client.write().await;
            *client = Some(partition_client.clone());
        }

        Ok(partition_client)
    }

    /// Resolves the fetch position, asking the broker on first use.
    async fn position(&self, client: &PartitionClient) -> Result<i64> {
        let (cached, committed) = {
            let state = self.state.lock();
            (state.next_offset, state.committed)
        };
        if let Some(offset) = cached.or(committed) {
            return Ok(offset);
        }

        let at = match self.config.consumer.start_from {
            StartOffset::Earliest => OffsetAt::Earliest,
            StartOffset::Latest => OffsetAt::Latest,
        };
        let offset = client
            .get_offset(at)
            .await
            .map_err(|e| Error::queue(format!("Failed to get offset: {}", e)))?;

        self.state.lock().next_offset = Some(offset);
        info!(
            topic = %self.config.topic,
            partition = 0,
            offset = offset,
            "Consumer initialized at offset"
        );
        Ok(offset)
    }

    /// Returns up to `max` deliveries: expired in-flight records first, then
    /// newly fetched ones.
    pub async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let timeout = self.visibility_timeout();
        let mut deliveries = self.state.lock().take_visible(max, Instant::now(), timeout);
        if deliveries.len() >= max {
            return Ok(deliveries);
        }

        let _fetching = self.fetch_lock.lock().await;

        if self.state.lock().in_flight.len() >= self.config.consumer.max_in_flight {
            debug!(
                in_flight = self.config.consumer.max_in_flight,
                "In-flight limit reached, not fetching"
            );
            return Ok(deliveries);
        }

        if let Err(e) = self.fetch().await {
            if deliveries.is_empty() {
                return Err(e);
            }
            warn!("Fetch failed, returning redeliveries only: {}", e);
            return Ok(deliveries);
        }

        let room = max - deliveries.len();
        deliveries.extend(self.state.lock().take_visible(room, Instant::now(), timeout));
        Ok(deliveries)
    }

    async fn fetch(&self) -> Result<()> {
        let client = self.ensure_connected().await?;
        let from = self.position(&client).await?;

        let fetched = client
            .fetch_records(
                from,
                1..self.config.consumer.fetch_max_bytes,
                self.config.consumer.fetch_wait_ms,
            )
            .await;

        match fetched {
            Ok((records, high_watermark)) => {
                health().queue.set_healthy();
                let count = records.len();
                self.state.lock().track_fetched(
                    from,
                    records.into_iter().map(|r| (r.offset, r.record.value)),
                );
                if count > 0 {
                    debug!(
                        records = count,
                        offset_start = from,
                        high_watermark = high_watermark,
                        "Fetched work items from Redpanda"
                    );
                }
                Ok(())
            }
            Err(ClientError::ServerError {
                protocol_error: ProtocolError::OffsetOutOfRange,
                ..
            }) => {
                let earliest = client
                    .get_offset(OffsetAt::Earliest)
                    .await
                    .map_err(|e| Error::queue(format!("Failed to get offset: {}", e)))?;
                warn!(
                    offset = from,
                    earliest = earliest,
                    "Fetch offset out of range, resuming at earliest retained offset"
                );
                self.state.lock().next_offset = Some(earliest);
                Ok(())
            }
            Err(e) => {
                error!("Fetch error: {}", e);
                health().queue.set_unhealthy(e.to_string());
                self.reset_connection().await;
                Err(Error::queue(format!("Failed to fetch records: {}", e)))
            }
        }
    }

    /// Acknowledges a delivery. Unknown or stale receipts are ignored.
    pub fn ack(&self, receipt: &Receipt) {
        let Some((offset, attempt)) = receipt.delivery::<i64>() else {
            warn!(receipt = %receipt, "Ignoring malformed receipt");
            return;
        };

        let mut state = self.state.lock();
        if !state.ack(offset, attempt) {
            debug!(offset = offset, attempt = attempt, "Ack for stale or settled delivery");
            return;
        }
        if let Some(committed) = state.advance_commit() {
            debug!(
                topic = %self.config.topic,
                partition = 0,
                offset = committed,
                "Committed offset"
            );
        }
    }

    /// Resets the connection (for error recovery).
    pub async fn reset_connection(&self) {
        let mut client = self.partition_client.write().await;
        *client = None;
        info!("Consumer connection reset");
    }
}
