//! Postcode enrichment of pending records.
//!
//! Each id in a work item is resolved independently: read the record, look
//! up its coordinate, write the terminal state back. Lookup failures become
//! ERROR records; only store failures leave an id unsettled so the queue
//! redelivers it.

use crate::lookup::PostcodeLookup;
use futures::stream::{self, StreamExt};
use pipeline_core::{
    CoordinateRecord, RecordState, RecordStatus, RecordStore, UpdateOutcome, WorkItem,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, info, warn};

/// How the worker treats records that are already terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Skip terminal records and only write over PENDING ones.
    #[default]
    PendingOnly,
    /// Always look up again and overwrite the stored result.
    Overwrite,
}

impl WritePolicy {
    fn expected_status(self) -> Option<RecordStatus> {
        match self {
            Self::PendingOnly => Some(RecordStatus::Pending),
            Self::Overwrite => None,
        }
    }
}

/// What happened to one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// No record with that id.
    NotFound,
    /// Left alone under [`WritePolicy::PendingOnly`].
    AlreadyTerminal(RecordStatus),
    Resolved(String),
    Failed(String),
    /// Another writer settled the record first.
    Conflict(RecordStatus),
    /// The store could not be read or written; retry later.
    StoreError(String),
}

/// Per-item tally of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub resolved: usize,
    pub failed: usize,
    pub not_found: usize,
    pub already_terminal: usize,
    pub conflicts: usize,
    pub store_errors: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::NotFound => self.not_found += 1,
            RecordOutcome::AlreadyTerminal(_) => self.already_terminal += 1,
            RecordOutcome::Resolved(_) => self.resolved += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
            RecordOutcome::Conflict(_) => self.conflicts += 1,
            RecordOutcome::StoreError(_) => self.store_errors += 1,
        }
    }

    /// True when every id reached a final answer and the item can be acked.
    pub fn is_settled(&self) -> bool {
        self.store_errors == 0
    }
}

/// Parse a stored coordinate, naming the field on failure.
pub fn parse_coordinate(field: &str, raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {} '{}'", field, raw))
}

/// Resolves record ids to postcodes.
pub struct EnrichmentWorker {
    store: Arc<dyn RecordStore>,
    lookup: Arc<dyn PostcodeLookup>,
    policy: WritePolicy,
    /// Ids of one item processed at once
    concurrency: usize,
}

impl EnrichmentWorker {
    pub fn new(store: Arc<dyn RecordStore>, lookup: Arc<dyn PostcodeLookup>) -> Self {
        Self {
            store,
            lookup,
            policy: WritePolicy::default(),
            concurrency: 4,
        }
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Process every id of a work item.
    pub async fn process_item(&self, item: &WorkItem) -> BatchReport {
        let outcomes: Vec<RecordOutcome> = stream::iter(item.ids().to_vec())
            .map(|id| async move { self.process_id(&id).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    /// Process one id. Never fails: every problem is an outcome.
    pub async fn process_id(&self, id: &str) -> RecordOutcome {
        metrics().in_flight_records.inc();
        let outcome = self.resolve_and_write(id).await;
        metrics().in_flight_records.dec();

        match &outcome {
            RecordOutcome::NotFound => metrics().records_skipped.inc(),
            RecordOutcome::AlreadyTerminal(_) => metrics().records_already_terminal.inc(),
            RecordOutcome::Resolved(_) => metrics().records_resolved.inc(),
            RecordOutcome::Failed(_) => metrics().records_failed.inc(),
            RecordOutcome::Conflict(_) => metrics().update_conflicts.inc(),
            RecordOutcome::StoreError(_) => metrics().store_errors.inc(),
        }
        outcome
    }

    async fn resolve_and_write(&self, id: &str) -> RecordOutcome {
        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(record_id = %id, "No record for id, skipping");
                return RecordOutcome::NotFound;
            }
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to read record");
                return RecordOutcome::StoreError(e.to_string());
            }
        };

        if self.policy == WritePolicy::PendingOnly && record.is_terminal() {
            debug!(record_id = %id, status = %record.status(), "Record already terminal");
            return RecordOutcome::AlreadyTerminal(record.status());
        }

        let looked_up = self.lookup_record(&record).await;
        let state = match &looked_up {
            Ok(postcode) => RecordState::resolved(postcode.clone())
                .unwrap_or_else(|e| RecordState::failed(e.to_string())),
            Err(cause) => RecordState::failed(cause.clone()),
        };

        match self
            .store
            .update(id, &state, self.policy.expected_status())
            .await
        {
            Ok(UpdateOutcome::Applied) => match state {
                RecordState::Resolved { postcode } => {
                    info!(record_id = %id, postcode = %postcode, "Record resolved");
                    RecordOutcome::Resolved(postcode)
                }
                RecordState::Failed { cause } => {
                    warn!(record_id = %id, error = %cause, "Record failed");
                    RecordOutcome::Failed(cause)
                }
                RecordState::Pending => RecordOutcome::StoreError(
                    "lookup produced no terminal state".to_string(),
                ),
            },
            Ok(UpdateOutcome::Conflict { current }) => {
                info!(
                    record_id = %id,
                    current = %current,
                    "Record settled concurrently, keeping stored result"
                );
                RecordOutcome::Conflict(current)
            }
            Ok(UpdateOutcome::NotFound) => {
                debug!(record_id = %id, "Record vanished before update");
                RecordOutcome::NotFound
            }
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to write record outcome");
                RecordOutcome::StoreError(e.to_string())
            }
        }
    }

    async fn lookup_record(&self, record: &CoordinateRecord) -> Result<String, String> {
        let latitude = parse_coordinate("latitude", &record.latitude)?;
        let longitude = parse_coordinate("longitude", &record.longitude)?;

        self.lookup
            .lookup(latitude, longitude)
            .await
            .map_err(|e| e.to_string())
    }
}
