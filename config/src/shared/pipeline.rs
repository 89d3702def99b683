use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// What the reducer does with an after-image that lacks its key or its change timestamp.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRecordPolicy {
    /// Drop the record with a warning; the rest of the batch proceeds.
    #[default]
    Skip,
    /// Abort the batch.
    Fail,
}

/// Configuration of one batch sync.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identifier attached to the logs of every run.
    pub id: u64,
    #[serde(default)]
    pub malformed_records: MalformedRecordPolicy,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.reconcile.validate()
    }
}

/// Settings of the delete-then-append reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum number of keys reconciled at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ReconcileConfig {
    pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrency == 0 {
            return Err(ValidationError::invalid(
                "pipeline.reconcile.max_concurrency",
                "must be greater than 0",
            ));
        }

        self.retry.validate()
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_concurrency() -> usize {
    ReconcileConfig::DEFAULT_MAX_CONCURRENCY
}

/// Exponential backoff applied when reconciling a key fails with a retryable error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per key, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                "pipeline.reconcile.retry.max_attempts",
                "must be greater than 0",
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::invalid(
                "pipeline.reconcile.retry.initial_delay_ms",
                "must not exceed `max_delay_ms`",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ValidationError::invalid(
                "pipeline.reconcile.retry.backoff_factor",
                "must be a finite number of at least 1.0",
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    RetryConfig::DEFAULT_BACKOFF_FACTOR
}
