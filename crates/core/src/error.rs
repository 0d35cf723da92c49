//! Unified error types for the pipeline.
//!
//! Error codes:
//! - STORE_001: Record store unavailable or rejected the operation
//! - QUEUE_001: Work queue unavailable or rejected the operation
//! - DATA_001-002: Dataset download / parse failures
//! - REC_001: Record violates the lifecycle invariants

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("[STORE_001] {0}")]
    Store(String),

    #[error("[QUEUE_001] {0}")]
    Queue(String),

    #[error("[DATA_001] {0}")]
    Dataset(String),

    #[error("[DATA_002] {0}")]
    Parse(String),

    #[error("[REC_001] {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_) => 400,
            Self::Serialization(_) => 400,
            Self::InvalidRecord(_) => 400,
            Self::NotFound(_) => 404,
            Self::Dataset(_) => 502,
            Self::Store(_) => 503,
            Self::Queue(_) => 503,
            Self::Config(_) => 500,
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Store(_) => Some("STORE_001"),
            Self::Queue(_) => Some("QUEUE_001"),
            Self::Dataset(_) => Some("DATA_001"),
            Self::Parse(_) => Some("DATA_002"),
            Self::InvalidRecord(_) => Some("REC_001"),
            _ => None,
        }
    }
}
