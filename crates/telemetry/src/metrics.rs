//! Internal metrics collection.
//!
//! Counters live in memory and are logged periodically by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 5ms, 25ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, +inf
    buckets: [AtomicU64; 10],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 10] = [5, 25, 100, 250, 500, 1000, 2500, 5000, 10000, u64::MAX];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns (upper bound, count) pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    // Ingest stage
    pub datasets_ingested: Counter,
    pub datasets_failed: Counter,
    pub rows_read: Counter,
    pub rows_rejected: Counter,
    pub rows_registered: Counter,
    pub registration_errors: Counter,

    // Work queue
    pub items_enqueued: Counter,
    pub enqueue_errors: Counter,
    pub items_received: Counter,
    pub items_redelivered: Counter,
    pub items_acked: Counter,
    pub undecodable_items: Counter,

    // Enrichment worker
    pub records_resolved: Counter,
    pub records_failed: Counter,
    pub records_skipped: Counter,
    pub records_already_terminal: Counter,
    pub update_conflicts: Counter,
    pub store_errors: Counter,

    // Lookup client
    pub lookup_attempts: Counter,
    pub lookup_retries: Counter,
    pub lookup_cache_hits: Counter,

    // Latency histograms
    pub ingest_latency_ms: Histogram,
    pub lookup_latency_ms: Histogram,
    pub store_latency_ms: Histogram,

    // Gauges
    pub in_flight_records: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub datasets_ingested: u64,
    pub datasets_failed: u64,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub items_enqueued: u64,
    pub enqueue_errors: u64,
    pub items_received: u64,
    pub items_redelivered: u64,
    pub records_resolved: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    pub update_conflicts: u64,
    pub store_errors: u64,
    pub lookup_attempts: u64,
    pub lookup_retries: u64,
    pub lookup_cache_hits: u64,
    pub ingest_latency_mean_ms: f64,
    pub lookup_latency_mean_ms: f64,
    pub store_latency_mean_ms: f64,
    pub in_flight_records: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            datasets_ingested: self.datasets_ingested.get(),
            datasets_failed: self.datasets_failed.get(),
            rows_read: self.rows_read.get(),
            rows_rejected: self.rows_rejected.get(),
            items_enqueued: self.items_enqueued.get(),
            enqueue_errors: self.enqueue_errors.get(),
            items_received: self.items_received.get(),
            items_redelivered: self.items_redelivered.get(),
            records_resolved: self.records_resolved.get(),
            records_failed: self.records_failed.get(),
            records_skipped: self.records_skipped.get(),
            update_conflicts: self.update_conflicts.get(),
            store_errors: self.store_errors.get(),
            lookup_attempts: self.lookup_attempts.get(),
            lookup_retries: self.lookup_retries.get(),
            lookup_cache_hits: self.lookup_cache_hits.get(),
            ingest_latency_mean_ms: self.ingest_latency_ms.mean(),
            lookup_latency_mean_ms: self.lookup_latency_ms.mean(),
            store_latency_mean_ms: self.store_latency_ms.mean(),
            in_flight_records: self.in_flight_records.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
