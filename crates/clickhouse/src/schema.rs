//! ClickHouse table schema.

use crate::client::ClickHouseClient;
use pipeline_core::{Error, Result};
use tracing::debug;

/// Name of the record table.
pub const COORDINATES_TABLE: &str = "coordinates";

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database)
}

/// One logical row per coordinate id, versioned.
///
/// `status` is PENDING, OK or ERROR. `postcode` is set only for OK rows and
/// `error` only for ERROR rows. Each state write inserts a higher `version`;
/// reads go through `FINAL`.
pub fn create_coordinates_table(database: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.{COORDINATES_TABLE} (
    id String,
    latitude String,
    longitude String,
    status LowCardinality(String),
    postcode Nullable(String),
    error Nullable(String),
    version UInt64,
    created_at DateTime DEFAULT now(),
    updated_at DateTime DEFAULT now()
)
ENGINE = ReplacingMergeTree(version)
ORDER BY id
SETTINGS index_granularity = 8192
"#
    )
}

/// Create the database and record table if missing.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let database = &client.config().database;

    client
        .server()
        .query(&create_database(database))
        .execute()
        .await
        .map_err(|e| Error::store(format!("Failed to create database: {}", e)))?;

    client
        .server()
        .query(&create_coordinates_table(database))
        .execute()
        .await
        .map_err(|e| Error::store(format!("Failed to execute DDL: {}", e)))?;

    debug!(database = %database, "ClickHouse schema initialized");
    Ok(())
}
