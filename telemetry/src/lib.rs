//! Tracing setup shared by the `syncer` binary and the test suites.

pub mod tracing;
