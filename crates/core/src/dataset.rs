//! Dataset references, storage notifications and row decoding.

use crate::error::{Error, Result};
use crate::record::CoordinateRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Columns a dataset header is expected to name.
pub const REQUIRED_COLUMNS: [&str; 3] = ["id", "latitude", "longitude"];

/// Location of an uploaded dataset object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub bucket: String,
    pub key: String,
}

impl DatasetRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Object-created notification in the S3 event format.
///
/// Only the fields needed to locate the object are decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StorageEventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

impl StorageEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::parse(format!("invalid storage event: {}", e)))
    }

    /// Dataset references in notification order, keys URL-decoded.
    pub fn datasets(&self) -> Vec<DatasetRef> {
        self.records
            .iter()
            .map(|r| DatasetRef::new(&r.s3.bucket.name, decode_object_key(&r.s3.object.key)))
            .collect()
    }
}

/// Decode an object key as it appears in bucket notifications
/// (form encoding: `+` is a space, `%XX` escapes).
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!(key = raw, error = %e, "Object key is not valid UTF-8 once decoded, using raw key");
            raw.to_string()
        }
    }
}

/// One dataset row. Absent columns default to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: String,
    pub latitude: String,
    pub longitude: String,
}

impl DatasetRow {
    pub fn into_record(self) -> CoordinateRecord {
        CoordinateRecord::pending(self.id, self.latitude, self.longitude)
    }
}

/// Positions of the required columns in a header row.
///
/// Rows are read positionally, so a row shorter than the header still
/// yields a record with the missing values left empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    id: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
}

impl ColumnIndex {
    /// Locate the required columns. The first occurrence of a name wins.
    pub fn from_header<'a, I>(header: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::default();
        for (position, name) in header.into_iter().enumerate() {
            let slot = match name.trim_start_matches('\u{feff}').trim() {
                "id" => &mut index.id,
                "latitude" => &mut index.latitude,
                "longitude" => &mut index.longitude,
                _ => continue,
            };
            slot.get_or_insert(position);
        }
        index
    }

    /// Required columns the header does not name.
    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .zip([self.id, self.latitude, self.longitude])
            .filter(|(_, position)| position.is_none())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Build a row from positional fields.
    pub fn row<'a, F>(&self, field: F) -> DatasetRow
    where
        F: Fn(usize) -> Option<&'a str>,
    {
        let value = |position: Option<usize>| {
            position
                .and_then(&field)
                .unwrap_or_default()
                .to_string()
        };
        DatasetRow {
            id: value(self.id),
            latitude: value(self.latitude),
            longitude: value(self.longitude),
        }
    }
}
