use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::EtlResult;
use crate::source::ChangeSource;
use crate::types::ChangeRecord;

#[derive(Debug)]
struct Inner {
    records: Vec<ChangeRecord>,
    captures: usize,
}

/// In-memory change source returning a preset change log.
///
/// Every capture returns the same records, which is how a source behaves when nothing changed
/// between two cycles and the staging log was not rotated.
#[derive(Debug, Clone)]
pub struct MemoryChangeSource {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChangeSource {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        let inner = Inner {
            records,
            captures: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Replaces the change log returned by the next captures.
    pub async fn set_records(&self, records: Vec<ChangeRecord>) {
        let mut inner = self.inner.lock().await;
        inner.records = records;
    }

    /// Returns how many times a capture was triggered.
    pub async fn captures(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.captures
    }
}

impl Default for MemoryChangeSource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ChangeSource for MemoryChangeSource {
    fn name() -> &'static str {
        "memory"
    }

    async fn capture_and_fetch(&self) -> EtlResult<Vec<ChangeRecord>> {
        let mut inner = self.inner.lock().await;
        inner.captures += 1;

        info!(records = inner.records.len(), "returning the in-memory change log");

        Ok(inner.records.clone())
    }
}
