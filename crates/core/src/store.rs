//! Record store contract.
//!
//! The store is the source of truth for enrichment outcomes. Every mutation
//! is a single-record update, optionally guarded by the status the caller
//! expects the record to have.

use crate::error::{Error, Result};
use crate::record::{CoordinateRecord, RecordState, RecordStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Result of a guarded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new state was written.
    Applied,
    /// The record exists but its status did not match the expected one.
    Conflict { current: RecordStatus },
    /// No record with that id.
    NotFound,
}

/// Result of registering a record at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record with that id already exists; it was left untouched.
    AlreadyExists,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by id.
    async fn get(&self, id: &str) -> Result<Option<CoordinateRecord>>;

    /// Register a PENDING record unless one with the same id exists.
    async fn create_pending(&self, record: &CoordinateRecord) -> Result<CreateOutcome>;

    /// Move a record into a terminal state.
    ///
    /// With `expected` set, the write only happens when the stored status
    /// equals it; otherwise `Conflict` is returned and nothing changes.
    async fn update(
        &self,
        id: &str,
        state: &RecordState,
        expected: Option<RecordStatus>,
    ) -> Result<UpdateOutcome>;
}

/// Reject writes that would move a record back to PENDING.
pub fn ensure_terminal(state: &RecordState) -> Result<()> {
    if state.is_terminal() {
        Ok(())
    } else {
        Err(Error::invalid_record("records can only be updated to a terminal state"))
    }
}

/// In-process record store.
///
/// Compare-and-set runs under one lock, so guarded updates are atomic.
/// Used for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, CoordinateRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record as-is (fixtures).
    pub fn insert(&self, record: CoordinateRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<CoordinateRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> Result<Option<CoordinateRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn create_pending(&self, record: &CoordinateRecord) -> Result<CreateOutcome> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut pending = record.clone();
        pending.state = RecordState::Pending;
        records.insert(pending.id.clone(), pending);
        Ok(CreateOutcome::Created)
    }

    async fn update(
        &self,
        id: &str,
        state: &RecordState,
        expected: Option<RecordStatus>,
    ) -> Result<UpdateOutcome> {
        ensure_terminal(state)?;

        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if let Some(expected) = expected {
            let current = record.status();
            if current != expected {
                return Ok(UpdateOutcome::Conflict { current });
            }
        }

        record.state = state.clone();
        Ok(UpdateOutcome::Applied)
    }
}
