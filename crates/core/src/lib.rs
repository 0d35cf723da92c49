//! Core types and contracts for the coordinate enrichment pipeline.
//!
//! Everything the stages agree on lives here:
//! - Coordinate records and their lifecycle state
//! - The work item envelope carried by the queue
//! - Dataset references and storage event notifications
//! - `RecordStore` / `WorkQueue` traits plus in-memory implementations

pub mod dataset;
pub mod error;
pub mod queue;
pub mod record;
pub mod store;
pub mod work_item;

pub use dataset::*;
pub use error::{Error, Result};
pub use queue::*;
pub use record::*;
pub use store::*;
pub use work_item::WorkItem;
