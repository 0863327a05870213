// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod baseline;
pub mod classify;
pub mod ingest;
pub mod metrics;
pub mod region;
pub mod resilience;
pub mod trending;

pub use crate::classify::RegionClassifier;
pub use crate::ingest::{BatchOutcome, Ingestor};
pub use crate::region::{Region, RegionAssignment};
