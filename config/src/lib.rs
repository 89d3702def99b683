//! Configuration for the change-data-capture sync.
//!
//! Holds the typed configuration of the change source, the destination and the batch pipeline,
//! together with the hierarchical loader used by the `syncer` binary.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
