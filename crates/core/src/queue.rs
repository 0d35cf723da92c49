//! Work queue contract.
//!
//! Delivery is at-least-once: a received item stays owned by the consumer
//! until it is acknowledged, and becomes visible again once its visibility
//! timeout lapses without an ack.

use crate::error::Result;
use crate::work_item::WorkItem;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Handle used to acknowledge one delivery.
///
/// Every delivery of a message gets its own receipt. An ack carrying the
/// receipt of an earlier delivery is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Receipt for delivery `attempt` of message `position`.
    pub fn for_delivery(position: impl fmt::Display, attempt: u32) -> Self {
        Self(format!("{}:{}", position, attempt))
    }

    /// Splits a [`Receipt::for_delivery`] receipt back into its parts.
    pub fn delivery<T: std::str::FromStr>(&self) -> Option<(T, u32)> {
        let (position, attempt) = self.0.split_once(':')?;
        Some((position.parse().ok()?, attempt.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn work_item(&self) -> Result<WorkItem> {
        WorkItem::decode(&self.payload)
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish one work item.
    async fn enqueue(&self, item: &WorkItem) -> Result<()>;

    /// Pull up to `max` visible deliveries. May return an empty batch.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    /// Acknowledging an unknown receipt is not an error.
    async fn ack(&self, receipt: &Receipt) -> Result<()>;
}

#[derive(Debug)]
struct QueuedMessage {
    seq: u64,
    payload: Vec<u8>,
    attempts: u32,
    invisible_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    next_seq: u64,
    messages: VecDeque<QueuedMessage>,
}

/// In-process queue with visibility-timeout redelivery.
#[derive(Debug)]
pub struct MemoryQueue {
    visibility_timeout: Duration,
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(MemoryQueueState::default()),
        }
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().messages.is_empty()
    }

    /// Decoded payloads of every unacknowledged message, in enqueue order.
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.state
            .lock()
            .messages
            .iter()
            .filter_map(|m| WorkItem::decode(&m.payload).ok())
            .collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<()> {
        let payload = item.encode()?;
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.messages.push_back(QueuedMessage {
            seq,
            payload,
            attempts: 0,
            invisible_until: None,
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let deadline = now + self.visibility_timeout;
        let mut state = self.state.lock();

        let deliveries = state
            .messages
            .iter_mut()
            .filter(|m| m.invisible_until.map_or(true, |until| until <= now))
            .take(max)
            .map(|m| {
                m.attempts += 1;
                m.invisible_until = Some(deadline);
                Delivery {
                    receipt: Receipt::for_delivery(m.seq, m.attempts),
                    payload: m.payload.clone(),
                    attempt: m.attempts,
                }
            })
            .collect();

        Ok(deliveries)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<()> {
        let Some((seq, attempt)) = receipt.delivery::<u64>() else {
            return Ok(());
        };
        let mut state = self.state.lock();
        state
            .messages
            .retain(|m| !(m.seq == seq && m.attempts == attempt));
        Ok(())
    }
}
