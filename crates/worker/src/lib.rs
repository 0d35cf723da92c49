//! Ingest and enrichment workers for the postcode pipeline.
//!
//! - Lookup (bounded-retry client for the postcode service)
//! - Dataset sources (filesystem or HTTP object endpoint)
//! - Ingest (dataset rows → PENDING records + work items)
//! - Enrichment (work item ids → terminal records)
//! - Consumer (queue → enrichment loop)
//! - Scheduler (consumer tasks + metrics logging)

pub mod consumer;
pub mod dataset;
pub mod enrichment;
pub mod ingest;
pub mod lookup;
pub mod scheduler;

pub use consumer::*;
pub use dataset::*;
pub use enrichment::*;
pub use ingest::*;
pub use lookup::*;
pub use scheduler::*;
