//! Destinations the resolved records are reconciled into.
//!
//! A destination only needs three primitives: make sure the table exists, delete the rows of a
//! key, and append rows. Upserts are built on top of them by [`crate::reconcile`].

mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod memory;

pub use base::Destination;
