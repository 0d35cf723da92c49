//! ClickHouse-backed record store for the postcode pipeline.

pub mod client;
pub mod config;
pub mod health;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use schema::init_schema;
pub use store::*;
