//! Batch change-data-capture sync.
//!
//! A run captures pending changes at the source, reduces them to the latest state of every
//! product key and reconciles each resolved record into the destination table with a
//! delete-then-append pair. See [`pipeline::BatchPipeline`] for the entry point.

pub mod destination;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod pipeline;
pub mod reconcile;
pub mod reducer;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
