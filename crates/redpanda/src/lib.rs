//! Redpanda-backed work queue for the postcode pipeline.

pub mod config;
mod connection;
pub mod consumer;
pub mod health;
pub mod producer;
pub mod queue;

pub use config::*;
pub use consumer::*;
pub use producer::*;
pub use queue::*;
