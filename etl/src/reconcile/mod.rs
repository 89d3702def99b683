//! Reconciliation of resolved records into a destination table.
//!
//! The destination offers no upsert, so every record is written with a two-step protocol:
//! delete the rows of its key, then append the fresh row. The pair is not atomic. A crash
//! between the steps leaves the key absent until the next run, and a retry repeats both steps,
//! so a key never ends up with two rows.

mod reconciler;
mod report;
mod retry;

pub use reconciler::Reconciler;
pub use report::{ReconcileFailure, ReconcileReport};
pub use retry::RetryPolicy;
