//! Record status read-back.

use axum::{
    extract::{Path, State},
    Json,
};
use pipeline_core::RecordView;

use crate::response::ApiError;
use crate::state::AppState;

/// GET /records/:id - Current state of one record.
pub async fn get_record_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, ApiError> {
    let record = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("record {} not found", id)))?;

    Ok(Json(RecordView::from(&record)))
}
