//! Helpers shared by unit and integration tests.
//!
//! - [`change`] builds change-log records and resolved records.
//! - [`database`] creates isolated Postgres databases from the `TESTS_DATABASE_*` variables.
//! - [`fault_destination`] wraps a destination to inject failures and count calls.
//! - [`failpoints`] configures failpoints for the duration of a test.

#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod change;
pub mod database;
pub mod failpoints;
pub mod fault_destination;
