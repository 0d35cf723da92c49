//! Application state shared across handlers.

use pipeline_core::RecordStore;
use std::sync::Arc;
use worker::IngestStage;

/// Shared state for the API.
#[derive(Clone)]
pub struct AppState {
    /// Runs dataset ingestion for storage notifications
    pub ingest: Arc<IngestStage>,
    /// Read access for record status lookups
    pub store: Arc<dyn RecordStore>,
}

impl AppState {
    pub fn new(ingest: Arc<IngestStage>, store: Arc<dyn RecordStore>) -> Self {
        Self { ingest, store }
    }
}
