//! Internal telemetry for the postcode pipeline.
//!
//! Structured logging setup, in-process metrics and the component health
//! registry consulted by the HTTP probes.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
