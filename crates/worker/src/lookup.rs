//! Postcode lookup client.
//!
//! Calls `GET <endpoint>?lon=<lon>&lat=<lat>` and returns the first
//! `result[].postcode`. Transient failures (connect errors, timeouts, 5xx,
//! 429) are retried under a [`RetryPolicy`]; everything else fails at once.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Why a lookup produced no postcode.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("lookup request timed out")]
    Timeout,

    #[error("lookup service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed lookup response: {0}")]
    MalformedBody(String),

    #[error("no postcode found for coordinate")]
    NoResult,
}

impl LookupError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_builder(),
            Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::MalformedBody(_) | Self::NoResult => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::MalformedBody(e.to_string())
        } else {
            Self::Transport(e)
        }
    }
}

/// Upper bound on configured attempts.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Bounded retry with geometric backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Ceiling for a single backoff
    pub max_delay: Duration,
    /// Ceiling for all backoff sleeps of one lookup
    pub max_elapsed: Duration,
    /// Which failures are worth another attempt
    pub retry_on: fn(&LookupError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, max_delay: Duration, max_elapsed: Duration) -> Self {
        self.max_delay = max_delay;
        self.max_elapsed = max_elapsed;
        self
    }

    /// Delay after failed attempt `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32, error: &LookupError) -> bool {
        attempt < self.max_attempts && (self.retry_on)(error)
    }

    /// Whether sleeping `delay` more keeps the lookup within `max_elapsed`.
    pub fn within_budget(&self, slept: Duration, delay: Duration) -> bool {
        slept.saturating_add(delay) <= self.max_elapsed
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(30),
            retry_on: LookupError::is_transient,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("max_elapsed", &self.max_elapsed)
            .finish_non_exhaustive()
    }
}

/// Anything that can turn a coordinate into a postcode.
#[async_trait]
pub trait PostcodeLookup: Send + Sync {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, LookupError>;
}

/// Lookup client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Reverse-geocoding endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total backoff allowed for one lookup
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Cached coordinate pairs; 0 disables the cache
    #[serde(default)]
    pub cache_capacity: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.postcodes.io/postcodes".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_retry_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retry_secs: default_max_retry_secs(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: 0,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl LookupConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_limits(
                Duration::from_millis(self.max_delay_ms),
                Duration::from_secs(self.max_retry_secs),
            )
    }

    /// Builds the client, wrapped in a cache when one is configured.
    pub fn build(&self) -> pipeline_core::Result<Arc<dyn PostcodeLookup>> {
        let client = LookupClient::new(
            &self.endpoint,
            self.retry_policy(),
            Duration::from_secs(self.timeout_secs),
        )?;

        if self.cache_capacity == 0 {
            return Ok(Arc::new(client));
        }

        Ok(Arc::new(CachedLookup::new(
            Arc::new(client),
            self.cache_capacity,
            Duration::from_secs(self.cache_ttl_secs),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    result: Option<Vec<LookupResult>>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(default)]
    postcode: Option<String>,
}

/// HTTP client for the postcode service.
#[derive(Clone)]
pub struct LookupClient {
    http_client: reqwest::Client,
    endpoint: Url,
    policy: RetryPolicy,
}

impl LookupClient {
    pub fn new(
        endpoint: &str,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> pipeline_core::Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            pipeline_core::Error::config(format!("invalid lookup endpoint {}: {}", endpoint, e))
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                pipeline_core::Error::config(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint,
            policy,
        })
    }

    fn url_for(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lon", &longitude.to_string())
            .append_pair("lat", &latitude.to_string());
        url
    }

    async fn attempt(&self, url: &Url) -> Result<String, LookupError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(LookupError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: LookupResponse = response.json().await.map_err(LookupError::from_reqwest)?;

        let first = body
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or(LookupError::NoResult)?;

        match first.postcode {
            Some(postcode) if !postcode.trim().is_empty() => Ok(postcode),
            _ => Err(LookupError::MalformedBody(
                "first result has no postcode".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PostcodeLookup for LookupClient {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, LookupError> {
        let url = self.url_for(latitude, longitude);
        let start = Instant::now();
        let mut attempt = 1;
        let mut slept = Duration::ZERO;

        let result = loop {
            metrics().lookup_attempts.inc();

            match self.attempt(&url).await {
                Ok(postcode) => break Ok(postcode),
                Err(e) if self.policy.should_retry(attempt, &e) => {
                    let delay = self.policy.delay_for(attempt);
                    if !self.policy.within_budget(slept, delay) {
                        warn!(
                            attempt = attempt,
                            slept_ms = %slept.as_millis(),
                            error = %e,
                            "Postcode lookup retry budget exhausted"
                        );
                        break Err(e);
                    }
                    warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Postcode lookup failed; retrying"
                    );
                    metrics().lookup_retries.inc();
                    tokio::time::sleep(delay).await;
                    slept += delay;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        metrics()
            .lookup_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        debug!(
            latitude = latitude,
            longitude = longitude,
            attempts = attempt,
            ok = result.is_ok(),
            "Postcode lookup finished"
        );

        result
    }
}

/// Caches successful lookups by coordinate pair.
pub struct CachedLookup {
    inner: Arc<dyn PostcodeLookup>,
    cache: Cache<(u64, u64), String>,
}

impl CachedLookup {
    pub fn new(inner: Arc<dyn PostcodeLookup>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl PostcodeLookup for CachedLookup {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, LookupError> {
        let key = (latitude.to_bits(), longitude.to_bits());

        if let Some(postcode) = self.cache.get(&key).await {
            metrics().lookup_cache_hits.inc();
            return Ok(postcode);
        }

        let postcode = self.inner.lookup(latitude, longitude).await?;
        self.cache.insert(key, postcode.clone()).await;
        Ok(postcode)
    }
}
