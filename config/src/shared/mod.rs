//! Configuration types shared by the sync library and the `syncer` binary.

mod base;
mod connection;
mod destination;
mod pipeline;
mod source;
mod sync;

pub use base::ValidationError;
pub use connection::{PgConnectionConfig, PgConnectionOptions, SOURCE_CAPTURE_OPTIONS, TlsConfig};
pub use destination::DestinationConfig;
pub use pipeline::{MalformedRecordPolicy, PipelineConfig, ReconcileConfig, RetryConfig};
pub use source::{QualifiedName, SourceConfig};
pub use sync::SyncConfig;
