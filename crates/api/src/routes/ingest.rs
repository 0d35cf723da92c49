//! Ingestion endpoint handler.
//!
//! Accepts an object-created storage notification
//! (`{"Records":[{"s3":{"bucket":{"name":..},"object":{"key":..}}}]}`) and
//! ingests every object it names.

use axum::{body::Bytes, extract::State, Json};
use pipeline_core::StorageEvent;
use tracing::{debug, error, warn};

use crate::response::{ApiError, IngestResponse};
use crate::state::AppState;

/// POST /ingest - Ingest the datasets named by a storage notification.
///
/// Returns 200 with the run summary even when some datasets failed; the
/// failures are listed in the body.
pub async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let event = StorageEvent::parse(&body).map_err(|e| {
        error!("Failed to parse storage notification: {}", e);
        ApiError::from(e)
    })?;

    let datasets = event.datasets();
    debug!(datasets = datasets.len(), "Received storage notification");

    let summary = state.ingest.ingest_all(&datasets).await;
    if !summary.failed.is_empty() {
        warn!(
            run_id = %summary.run_id,
            failed = summary.failed.len(),
            "Some datasets could not be ingested"
        );
    }

    Ok(Json(IngestResponse::from_summary(summary)))
}
