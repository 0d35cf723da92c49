//! Broker connection setup shared by the producer, consumer and health checks.

use crate::config::RedpandaConfig;
use pipeline_core::{Error, Result};
use rskafka::client::{
    partition::{PartitionClient, UnknownTopicHandling},
    Client, ClientBuilder, Credentials, SaslConfig,
};
use std::sync::Arc;

/// Creates a TLS configuration for Redpanda Cloud.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Connects to the cluster, with TLS + SASL when credentials are set.
pub async fn connect(config: &RedpandaConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new(config.brokers.clone());

    if let (Some(username), Some(password)) = (&config.sasl_username, &config.sasl_password) {
        builder = builder
            .tls_config(create_tls_config())
            .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                username.clone(),
                password.clone(),
            )));
    }

    builder
        .build()
        .await
        .map_err(|e| Error::queue(format!("Failed to connect to Redpanda: {}", e)))
}

/// Partition client for the work item topic (partition 0).
pub async fn partition_client(config: &RedpandaConfig) -> Result<Arc<PartitionClient>> {
    let client = connect(config).await?;

    let partition_client = client
        .partition_client(config.topic.clone(), 0, UnknownTopicHandling::Retry)
        .await
        .map_err(|e| Error::queue(format!("Failed to get partition client: {}", e)))?;

    Ok(Arc::new(partition_client))
}
