//! Work item envelope carried by the queue.
//!
//! The canonical wire form is a JSON array of record ids (`["42"]`).
//! Decoding also accepts the single-record object form
//! `{"id": "42", "latitude": "...", "longitude": "..."}`; only the id is
//! kept because the record store owns the coordinates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Reference to one or more records awaiting enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkItem {
    ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireItem {
    Ids(Vec<String>),
    Record { id: String },
}

impl WorkItem {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    /// Work item referencing a single record (what ingest emits).
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Serialize to the canonical wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a queue payload in either accepted form.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let wire: WireItem = serde_json::from_slice(payload).map_err(|e| {
            Error::parse(format!("undecodable work item: {}", e))
        })?;

        Ok(match wire {
            WireItem::Ids(ids) => Self { ids },
            WireItem::Record { id } => Self::single(id),
        })
    }
}
