//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use worker::IngestSummary;

/// Response for an ingest run.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// True when every dataset was ingested
    pub success: bool,
    pub rows_enqueued: u64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub summary: IngestSummary,
}

impl IngestResponse {
    pub fn from_summary(summary: IngestSummary) -> Self {
        Self {
            success: summary.failed.is_empty(),
            rows_enqueued: summary.rows_enqueued(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            summary,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_connected: bool,
    pub store_connected: bool,
    pub in_flight_records: u64,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// API error type.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "REQ_001", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, "REC_404", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<pipeline_core::Error> for ApiError {
    fn from(err: pipeline_core::Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match err.error_code() {
            Some(code) => ApiError::with_code(status, code, err.to_string()),
            None if status == StatusCode::NOT_FOUND => ApiError::not_found(err.to_string()),
            None if status == StatusCode::BAD_REQUEST => ApiError::bad_request(err.to_string()),
            None => ApiError::internal(err.to_string()),
        }
    }
}
