//! Redpanda health checks and topic bootstrap.

use crate::config::RedpandaConfig;
use crate::connection;
use pipeline_core::{Error, Result};
use rskafka::client::error::{Error as ClientError, ProtocolError};
use tracing::{debug, error, info};

/// Check Redpanda connection health.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    match connection::connect(config).await {
        Ok(client) => match client.list_topics().await {
            Ok(topics) => {
                debug!(topics = topics.len(), "Redpanda connection healthy");
                true
            }
            Err(e) => {
                error!("Failed to list Redpanda topics: {}", e);
                false
            }
        },
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}

/// Creates the work topic if it does not exist yet.
///
/// Returns `true` when the topic was created by this call.
pub async fn ensure_topic(config: &RedpandaConfig) -> Result<bool> {
    let client = connection::connect(config).await?;

    let topics = client
        .list_topics()
        .await
        .map_err(|e| Error::queue(format!("Failed to list topics: {}", e)))?;
    if topics.iter().any(|t| t.name == config.topic) {
        debug!(topic = %config.topic, "Topic exists");
        return Ok(false);
    }

    let controller = client
        .controller_client()
        .map_err(|e| Error::queue(format!("Failed to get controller client: {}", e)))?;

    match controller
        .create_topic(
            config.topic.clone(),
            config.partitions,
            config.replication_factor,
            5_000,
        )
        .await
    {
        Ok(()) => {
            info!(
                topic = %config.topic,
                partitions = config.partitions,
                replication_factor = config.replication_factor,
                "Created topic"
            );
            Ok(true)
        }
        Err(ClientError::ServerError {
            protocol_error: ProtocolError::TopicAlreadyExists,
            ..
        }) => Ok(false),
        Err(e) => Err(Error::queue(format!(
            "Failed to create topic {}: {}",
            config.topic, e
        ))),
    }
}
