//! `WorkQueue` backed by a Redpanda topic.

use crate::config::RedpandaConfig;
use crate::consumer::Consumer;
use crate::producer::Producer;
use async_trait::async_trait;
use pipeline_core::{Delivery, Receipt, Result, WorkItem, WorkQueue};

/// Producer and consumer sharing one topic.
pub struct RedpandaQueue {
    producer: Producer,
    consumer: Consumer,
}

impl RedpandaQueue {
    pub fn new(config: RedpandaConfig) -> Self {
        Self {
            producer: Producer::new(config.clone()),
            consumer: Consumer::new(config),
        }
    }
}

#[async_trait]
impl WorkQueue for RedpandaQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<()> {
        self.producer.send(item).await.map(|_| ())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        self.consumer.receive(max).await
    }

    async fn ack(&self, receipt: &Receipt) -> Result<()> {
        self.consumer.ack(receipt);
        Ok(())
    }
}
