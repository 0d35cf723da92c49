//! Redpanda configuration.

use serde::{Deserialize, Serialize};

/// Where a fresh consumer starts reading.
///
/// `Earliest` replays everything still retained: the record store makes
/// replays cheap no-ops, so nothing enqueued before a restart is lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

/// Consumer-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Upper bound on bytes returned by one fetch
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,
    /// How long a fetch waits for new records
    #[serde(default = "default_fetch_wait_ms")]
    pub fetch_wait_ms: i32,
    /// Seconds a delivered, unacknowledged item stays invisible
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Stop fetching while this many items are awaiting an ack
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub start_from: StartOffset,
}

fn default_fetch_max_bytes() -> i32 {
    1024 * 1024
}

fn default_fetch_wait_ms() -> i32 {
    500
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_max_in_flight() -> usize {
    1000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_wait_ms: default_fetch_wait_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_in_flight: default_max_in_flight(),
            start_from: StartOffset::default(),
        }
    }
}

/// Redpanda work queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topic carrying work items
    #[serde(default = "default_topic")]
    pub topic: String,
    /// SASL username (Redpanda Cloud)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (Redpanda Cloud)
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// Compression type (none, gzip, snappy, lz4, zstd)
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Partitions used when the topic has to be created
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    /// Replication factor used when the topic has to be created
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i16,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

fn default_topic() -> String {
    "coordinates".to_string()
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i16 {
    1
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: default_topic(),
            sasl_username: None,
            sasl_password: None,
            compression: default_compression(),
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }
}
