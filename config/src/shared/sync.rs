use serde::Deserialize;

use crate::Config;
use crate::shared::{DestinationConfig, PipelineConfig, SourceConfig, ValidationError};

/// Top-level configuration of the `syncer` binary.
///
/// This intentionally does not implement [`Serialize`](serde::Serialize) to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub pipeline: PipelineConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.destination.validate()?;
        self.pipeline.validate()
    }
}

impl Config for SyncConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
