//! `RecordStore` backed by the `coordinates` table.
//!
//! Rows are versioned: the table is a `ReplacingMergeTree(version)` and every
//! read uses `FINAL`, so the row with the highest version is the record.
//! PENDING rows carry version 0 and never replace a terminal row.
//!
//! A state write is one conditional `INSERT ... SELECT` that copies the stored
//! row under a fresh version, filtered on the expected status. Reading the row
//! back tells whether that version is the one that stuck.

use crate::client::ClickHouseClient;
use crate::schema::COORDINATES_TABLE;
use async_trait::async_trait;
use clickhouse::Row;
use pipeline_core::{
    ensure_terminal, CoordinateRecord, CreateOutcome, Error, RecordState, RecordStatus,
    RecordStore, Result, UpdateOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use telemetry::{health, metrics};
use tracing::{debug, error, info};

/// Version of a freshly registered row.
pub const PENDING_VERSION: u64 = 0;

static LAST_VERSION: AtomicU64 = AtomicU64::new(PENDING_VERSION);

/// Next row version: wall-clock nanoseconds, strictly increasing in-process.
fn next_version() -> u64 {
    let now = chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default();
    let previous = LAST_VERSION
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

/// Persisted shape of a record.
#[derive(Debug, Clone, PartialEq, Eq, Row, Serialize, Deserialize)]
pub struct CoordinateRow {
    pub id: String,
    pub latitude: String,
    pub longitude: String,
    pub status: String,
    pub postcode: Option<String>,
    pub error: Option<String>,
    pub version: u64,
}

impl From<&CoordinateRecord> for CoordinateRow {
    fn from(record: &CoordinateRecord) -> Self {
        Self {
            id: record.id.clone(),
            latitude: record.latitude.clone(),
            longitude: record.longitude.clone(),
            status: record.status().as_str().to_string(),
            postcode: record.state.postcode().map(str::to_string),
            error: record.state.error().map(str::to_string),
            version: PENDING_VERSION,
        }
    }
}

impl TryFrom<CoordinateRow> for CoordinateRecord {
    type Error = Error;

    fn try_from(row: CoordinateRow) -> Result<Self> {
        let status: RecordStatus = row.status.parse()?;
        Ok(Self {
            id: row.id,
            latitude: row.latitude,
            longitude: row.longitude,
            state: RecordState::from_parts(status, row.postcode, row.error)?,
        })
    }
}

/// Statement writing a new version of one row, guarded on its status.
fn conditional_write_sql(guarded: bool) -> String {
    let mut sql = format!(
        "INSERT INTO {table} (id, latitude, longitude, status, postcode, error, version, created_at) \
         SELECT id, latitude, longitude, ?, ?, ?, ?, created_at FROM {table} FINAL WHERE id = ?",
        table = COORDINATES_TABLE
    );
    if guarded {
        sql.push_str(" AND status = ?");
    }
    sql
}

/// Decide the outcome of a write from the row read back after it.
fn write_outcome(written: u64, stored: Option<&CoordinateRow>) -> Result<UpdateOutcome> {
    match stored {
        None => Ok(UpdateOutcome::NotFound),
        Some(row) if row.version == written => Ok(UpdateOutcome::Applied),
        Some(row) => Ok(UpdateOutcome::Conflict {
            current: row.status.parse()?,
        }),
    }
}

/// ClickHouse record store.
#[derive(Clone)]
pub struct ClickHouseRecordStore {
    client: ClickHouseClient,
}

impl ClickHouseRecordStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    fn failed(&self, op: &str, e: clickhouse::error::Error) -> Error {
        error!(op = op, "ClickHouse error: {}", e);
        health().store.set_unhealthy(e.to_string());
        Error::store(format!("{} failed: {}", op, e))
    }

    fn observe(&self, start: Instant) {
        health().store.set_healthy();
        metrics()
            .store_latency_ms
            .observe(start.elapsed().as_millis() as u64);
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<CoordinateRow>> {
        let start = Instant::now();
        let row = self
            .client
            .inner()
            .query(&format!(
                "SELECT ?fields FROM {} FINAL WHERE id = ? LIMIT 1",
                COORDINATES_TABLE
            ))
            .bind(id)
            .fetch_optional::<CoordinateRow>()
            .await
            .map_err(|e| self.failed("select", e))?;
        self.observe(start);
        Ok(row)
    }

    /// Number of records (used by tests and admin tooling).
    pub async fn count(&self) -> Result<u64> {
        let count: u64 = self
            .client
            .inner()
            .query(&format!("SELECT count() FROM {} FINAL", COORDINATES_TABLE))
            .fetch_one()
            .await
            .map_err(|e| self.failed("count", e))?;
        Ok(count)
    }

    /// Drop every row (test cleanup).
    pub async fn truncate(&self) -> Result<()> {
        self.client
            .inner()
            .query(&format!("TRUNCATE TABLE IF EXISTS {}", COORDINATES_TABLE))
            .execute()
            .await
            .map_err(|e| self.failed("truncate", e))
    }
}

#[async_trait]
impl RecordStore for ClickHouseRecordStore {
    async fn get(&self, id: &str) -> Result<Option<CoordinateRecord>> {
        self.fetch_row(id)
            .await?
            .map(CoordinateRecord::try_from)
            .transpose()
    }

    /// Concurrent registrations of one id may both insert; the duplicate
    /// PENDING rows collapse under `FINAL` and never outrank a terminal row.
    async fn create_pending(&self, record: &CoordinateRecord) -> Result<CreateOutcome> {
        if self.fetch_row(&record.id).await?.is_some() {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let mut pending = record.clone();
        pending.state = RecordState::Pending;
        let row = CoordinateRow::from(&pending);

        let start = Instant::now();
        let mut insert = self
            .client
            .inner()
            .insert::<CoordinateRow>(COORDINATES_TABLE)
            .map_err(|e| self.failed("insert", e))?;
        insert.write(&row).await.map_err(|e| self.failed("insert", e))?;
        insert.end().await.map_err(|e| self.failed("insert", e))?;
        self.observe(start);

        debug!(id = %record.id, "Registered pending record");
        Ok(CreateOutcome::Created)
    }

    async fn update(
        &self,
        id: &str,
        state: &RecordState,
        expected: Option<RecordStatus>,
    ) -> Result<UpdateOutcome> {
        ensure_terminal(state)?;

        let version = next_version();
        let sql = conditional_write_sql(expected.is_some());
        let mut query = self
            .client
            .inner()
            .query(&sql)
            .bind(state.status().as_str())
            .bind(state.postcode())
            .bind(state.error())
            .bind(version)
            .bind(id);
        if let Some(expected) = expected {
            query = query.bind(expected.as_str());
        }

        let start = Instant::now();
        query.execute().await.map_err(|e| self.failed("update", e))?;
        self.observe(start);

        let stored = self.fetch_row(id).await?;
        let outcome = write_outcome(version, stored.as_ref())?;
        match outcome {
            UpdateOutcome::Applied => {
                debug!(id = %id, status = %state.status(), version = version, "Updated record")
            }
            UpdateOutcome::Conflict { current } => {
                info!(id = %id, current = %current, "Record write superseded")
            }
            UpdateOutcome::NotFound => debug!(id = %id, "No record to update"),
        }
        Ok(outcome)
    }
}
