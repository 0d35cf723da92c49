//! Postcode enrichment pipeline
//!
//! Queue-mediated coordinate enrichment:
//! - Dataset ingest (storage notification → PENDING records + work items)
//! - Redpanda work queue with at-least-once redelivery
//! - Enrichment workers calling the postcode lookup service
//! - ClickHouse record store as the source of truth

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseRecordStore};
use pipeline_core::{MemoryQueue, MemoryRecordStore, RecordStore, WorkQueue};
use redpanda::{RedpandaConfig, RedpandaQueue};
use telemetry::{health, init_tracing_from_env};
use worker::{DatasetConfig, EnrichmentWorker, IngestStage, LookupConfig, WorkerConfig, WorkerScheduler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreBackend {
    #[default]
    Clickhouse,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum QueueBackend {
    #[default]
    Redpanda,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreSection {
    #[serde(default)]
    backend: StoreBackend,
    #[serde(default)]
    clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueSection {
    #[serde(default)]
    backend: QueueBackend,
    #[serde(default)]
    redpanda: RedpandaConfig,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    /// Run enrichment workers in this process
    #[serde(default = "default_run_workers")]
    run_workers: bool,

    #[serde(default)]
    store: StoreSection,

    #[serde(default)]
    queue: QueueSection,

    #[serde(default)]
    lookup: LookupConfig,

    #[serde(default)]
    dataset: DatasetConfig,

    #[serde(default)]
    worker: WorkerConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_run_workers() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_workers: default_run_workers(),
            store: StoreSection::default(),
            queue: QueueSection::default(),
            lookup: LookupConfig::default(),
            dataset: DatasetConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting postcode pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        store = ?config.store.backend,
        queue = ?config.queue.backend,
        dataset = ?config.dataset.backend,
        lookup_endpoint = %config.lookup.endpoint,
        write_policy = ?config.worker.write_policy,
        "Loaded configuration"
    );

    let (store, clickhouse) = build_store(&config).await;
    let queue = build_queue(&config).await;

    check_health(&config, clickhouse.as_ref()).await;

    let lookup = config
        .lookup
        .build()
        .context("Failed to create lookup client")?;
    let dataset_source = config
        .dataset
        .build()
        .context("Failed to create dataset source")?;

    let ingest = Arc::new(IngestStage::new(
        dataset_source,
        store.clone(),
        queue.clone(),
    ));

    let worker_handles = if config.run_workers {
        let scheduler = Arc::new(WorkerScheduler::new(
            config.worker.clone(),
            queue.clone(),
            EnrichmentWorker::new(store.clone(), lookup),
        ));
        scheduler.start()
    } else {
        info!("Enrichment workers disabled");
        Vec::new()
    };

    let app = router(AppState::new(ingest, store));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");

    // Unacked deliveries of an aborted worker are redelivered later
    for handle in worker_handles {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn build_store(config: &Config) -> (Arc<dyn RecordStore>, Option<ClickHouseClient>) {
    match config.store.backend {
        StoreBackend::Clickhouse => {
            let client = ClickHouseClient::new(config.store.clickhouse.clone());

            if let Err(e) = clickhouse_client::init_schema(&client).await {
                error!("Failed to initialize ClickHouse schema: {}", e);
                // Continue anyway - schema might already exist
            }

            let store = Arc::new(ClickHouseRecordStore::new(client.clone()));
            (store, Some(client))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory record store; records are lost on restart");
            (Arc::new(MemoryRecordStore::new()), None)
        }
    }
}

async fn build_queue(config: &Config) -> Arc<dyn WorkQueue> {
    match config.queue.backend {
        QueueBackend::Redpanda => {
            if let Err(e) = redpanda::health::ensure_topic(&config.queue.redpanda).await {
                error!("Failed to ensure work topic: {}", e);
            }
            Arc::new(RedpandaQueue::new(config.queue.redpanda.clone()))
        }
        QueueBackend::Memory => {
            warn!("Using in-memory work queue; pending items are lost on restart");
            Arc::new(MemoryQueue::new(Duration::from_secs(
                config.queue.redpanda.consumer.visibility_timeout_secs,
            )))
        }
    }
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PIPELINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate's nested parsing doesn't work reliably with underscored
    // field names or lists, so the common settings get flat overrides
    if let Ok(brokers) = std::env::var("PIPELINE_QUEUE_BROKERS") {
        config.queue.redpanda.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(topic) = std::env::var("PIPELINE_QUEUE_TOPIC") {
        config.queue.redpanda.topic = topic;
    }
    if let Ok(username) = std::env::var("PIPELINE_QUEUE_SASL_USERNAME") {
        config.queue.redpanda.sasl_username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_QUEUE_SASL_PASSWORD") {
        config.queue.redpanda.sasl_password = Some(password);
    }

    if let Ok(url) = std::env::var("PIPELINE_STORE_URL") {
        config.store.clickhouse.url = url;
    }
    if let Ok(database) = std::env::var("PIPELINE_STORE_DATABASE") {
        config.store.clickhouse.database = database;
    }
    if let Ok(username) = std::env::var("PIPELINE_STORE_USERNAME") {
        config.store.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_STORE_PASSWORD") {
        config.store.clickhouse.password = Some(password);
    }

    if let Ok(endpoint) = std::env::var("PIPELINE_LOOKUP_ENDPOINT") {
        config.lookup.endpoint = endpoint;
    }
    if let Ok(endpoint) = std::env::var("PIPELINE_DATASET_ENDPOINT") {
        config.dataset.endpoint = Some(endpoint);
    }

    Ok(config)
}

/// Check component health on startup.
async fn check_health(config: &Config, clickhouse: Option<&ClickHouseClient>) {
    match config.queue.backend {
        QueueBackend::Redpanda => {
            if redpanda::health::check_connection(&config.queue.redpanda).await {
                health().queue.set_healthy();
                info!("Redpanda connection: healthy");
            } else {
                health().queue.set_unhealthy("Connection failed");
                error!("Redpanda connection: unhealthy");
            }
        }
        QueueBackend::Memory => health().queue.set_healthy(),
    }

    match clickhouse {
        Some(client) => {
            if clickhouse_client::health::check_connection(client).await {
                health().store.set_healthy();
                info!("ClickHouse connection: healthy");
            } else {
                health().store.set_unhealthy("Connection failed");
                error!("ClickHouse connection: unhealthy");
            }
        }
        None => health().store.set_healthy(),
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
