//! Work item producer.

use crate::config::RedpandaConfig;
use crate::connection;
use chrono::Utc;
use pipeline_core::{Error, Result, WorkItem};
use rskafka::client::partition::{Compression, PartitionClient};
use rskafka::record::Record;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Publishes one Redpanda record per work item.
pub struct Producer {
    config: RedpandaConfig,
    /// Cached partition client
    client: RwLock<Option<Arc<PartitionClient>>>,
}

impl Producer {
    pub fn new(config: RedpandaConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    /// Gets or creates the partition client.
    async fn get_client(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let partition_client = connection::partition_client(&self.config).await?;

        {
            let mut client = self.client.write().await;
            *client = Some(partition_client.clone());
        }

        Ok(partition_client)
    }

    fn compression(&self) -> Compression {
        match self.config.compression.as_str() {
            "gzip" => Compression::Gzip,
            "snappy" => Compression::Snappy,
            "lz4" => Compression::Lz4,
            "zstd" => Compression::Zstd,
            _ => Compression::NoCompression,
        }
    }

    /// Sends a work item and returns the offset it was written at.
    pub async fn send(&self, item: &WorkItem) -> Result<i64> {
        let client = self.get_client().await?;
        let start = std::time::Instant::now();

        let record = Record {
            key: item.ids().first().map(|id| id.clone().into_bytes()),
            value: Some(item.encode()?),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let offsets = match client.produce(vec![record], self.compression()).await {
            Ok(offsets) => offsets,
            Err(e) => {
                error!(topic = %self.config.topic, "Failed to produce work item: {}", e);
                self.reset_connection().await;
                return Err(Error::queue(format!("Failed to produce: {}", e)));
            }
        };

        let offset = offsets
            .first()
            .copied()
            .ok_or_else(|| Error::queue("Broker returned no offset for produced record"))?;

        debug!(
            topic = %self.config.topic,
            offset = offset,
            ids = item.len(),
            latency_ms = %start.elapsed().as_millis(),
            "Produced work item"
        );

        Ok(offset)
    }

    /// Drops the cached client so the next send reconnects.
    pub async fn reset_connection(&self) {
        let mut client = self.client.write().await;
        *client = None;
        info!("Producer connection reset");
    }
}
