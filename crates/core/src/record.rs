//! Coordinate records and their lifecycle.
//!
//! A record is created PENDING at ingest and moves exactly once into a
//! terminal state. `RecordState` folds status, postcode and error into one
//! sum type so an OK record without a postcode cannot be built.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status tag of a record, as persisted and exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Pending,
    Ok,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "OK" => Ok(Self::Ok),
            "ERROR" => Ok(Self::Error),
            other => Err(Error::invalid_record(format!("unknown status '{}'", other))),
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Resolved { postcode: String },
    Failed { cause: String },
}

impl RecordState {
    /// Successful lookup. The postcode must be non-empty.
    pub fn resolved(postcode: impl Into<String>) -> Result<Self> {
        let postcode = postcode.into();
        if postcode.trim().is_empty() {
            return Err(Error::invalid_record("resolved record needs a postcode"));
        }
        Ok(Self::Resolved { postcode })
    }

    /// Failed lookup. An empty cause is replaced so ERROR always carries text.
    pub fn failed(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        let cause = if cause.trim().is_empty() {
            "unknown error".to_string()
        } else {
            cause
        };
        Self::Failed { cause }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Pending => RecordStatus::Pending,
            Self::Resolved { .. } => RecordStatus::Ok,
            Self::Failed { .. } => RecordStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn postcode(&self) -> Option<&str> {
        match self {
            Self::Resolved { postcode } => Some(postcode),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    /// Rebuild a state from its persisted columns.
    ///
    /// Rejects combinations the invariants forbid (OK without postcode,
    /// ERROR without error text, PENDING carrying either).
    pub fn from_parts(
        status: RecordStatus,
        postcode: Option<String>,
        error: Option<String>,
    ) -> Result<Self> {
        match (status, postcode, error) {
            (RecordStatus::Pending, None, None) => Ok(Self::Pending),
            (RecordStatus::Ok, Some(postcode), None) => Self::resolved(postcode),
            (RecordStatus::Error, None, Some(cause)) if !cause.trim().is_empty() => {
                Ok(Self::Failed { cause })
            }
            (status, postcode, error) => Err(Error::invalid_record(format!(
                "inconsistent {} record (postcode: {:?}, error: {:?})",
                status, postcode, error
            ))),
        }
    }
}

/// One coordinate pair and its enrichment state.
///
/// Coordinates are kept exactly as ingested: malformed values are allowed
/// through and surface as a failed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateRecord {
    pub id: String,
    pub latitude: String,
    pub longitude: String,
    pub state: RecordState,
}

impl CoordinateRecord {
    /// Creates a new PENDING record.
    pub fn pending(
        id: impl Into<String>,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            latitude: latitude.into(),
            longitude: longitude.into(),
            state: RecordState::Pending,
        }
    }

    pub fn status(&self) -> RecordStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Flat representation used on the wire and in storage rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: String,
    pub latitude: String,
    pub longitude: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CoordinateRecord> for RecordView {
    fn from(record: &CoordinateRecord) -> Self {
        Self {
            id: record.id.clone(),
            latitude: record.latitude.clone(),
            longitude: record.longitude.clone(),
            status: record.status(),
            postcode: record.state.postcode().map(str::to_string),
            error: record.state.error().map(str::to_string),
        }
    }
}

impl TryFrom<RecordView> for CoordinateRecord {
    type Error = Error;

    fn try_from(view: RecordView) -> Result<Self> {
        let state = RecordState::from_parts(view.status, view.postcode, view.error)?;
        Ok(Self {
            id: view.id,
            latitude: view.latitude,
            longitude: view.longitude,
            state,
        })
    }
}
