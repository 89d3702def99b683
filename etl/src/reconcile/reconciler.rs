use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use config::shared::ReconcileConfig;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
#[cfg(feature = "failpoints")]
use crate::failpoints::{RECONCILE_AFTER_DELETE_FP, etl_fail_point};
use crate::reconcile::{ReconcileFailure, ReconcileReport, RetryPolicy};
use crate::types::{ProductKey, ResolvedRecord, TableSchema};

/// Writes resolved records into one destination table with delete-then-append.
///
/// Cloning is cheap and clones share the destination, which is how concurrent reconciliations
/// of distinct keys reach the same table.
#[derive(Debug, Clone)]
pub struct Reconciler<D> {
    destination: D,
    table_schema: Arc<TableSchema>,
    retry_policy: RetryPolicy,
    max_concurrency: usize,
}

impl<D> Reconciler<D>
where
    D: Destination + Clone + Send + Sync + 'static,
{
    pub fn new(destination: D, table_schema: TableSchema, config: &ReconcileConfig) -> Self {
        Self {
            destination,
            table_schema: Arc::new(table_schema),
            retry_policy: RetryPolicy::from(&config.retry),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Creates the destination table if it is missing, never truncating it.
    pub async fn prepare(&self) -> EtlResult<()> {
        self.destination.prepare_table(&self.table_schema).await
    }

    /// Reconciles one record, retrying the delete and append pair on retryable errors.
    ///
    /// Retrying is safe because the delete removes whatever a failed attempt appended.
    pub async fn reconcile(&self, record: ResolvedRecord) -> EtlResult<()> {
        let key = record.key;
        let mut attempt = 1;

        loop {
            let err = match self.reconcile_once(&record).await {
                Ok(()) => {
                    debug!(key, attempt, "record reconciled");
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.retry_policy.max_attempts() {
                warn!(key, attempt, error = %err, "reconciliation failed");
                return Err(err);
            }

            let delay = self.retry_policy.backoff(attempt);
            warn!(
                key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "reconciliation failed, retrying"
            );

            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn reconcile_once(&self, record: &ResolvedRecord) -> EtlResult<()> {
        self.destination
            .delete_rows_by_key(&self.table_schema, record.key)
            .await?;

        #[cfg(feature = "failpoints")]
        etl_fail_point(RECONCILE_AFTER_DELETE_FP)?;

        self.destination
            .append_table_rows(&self.table_schema, vec![record.clone().into_table_row()])
            .await
    }

    /// Reconciles every record concurrently, at most `max_concurrency` keys at a time.
    ///
    /// Records sharing a key are reconciled one after the other, in input order, by the same
    /// task; distinct keys never conflict. A failing key is reported and does not stop the
    /// others.
    pub async fn reconcile_all(&self, records: Vec<ResolvedRecord>) -> ReconcileReport {
        let mut by_key: BTreeMap<ProductKey, Vec<ResolvedRecord>> = BTreeMap::new();
        for record in records {
            by_key.entry(record.key).or_default().push(record);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();
        let mut pending = HashSet::new();
        let mut report = ReconcileReport::default();

        for (key, records) in by_key {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    report.failures.push(ReconcileFailure {
                        key,
                        error: etl_error!(
                            ErrorKind::InvalidState,
                            "Could not acquire semaphore while reconciling records",
                            err.to_string()
                        ),
                    });
                    continue;
                }
            };

            let reconciler = self.clone();
            pending.insert(key);
            join_set.spawn(async move {
                let result = AssertUnwindSafe(reconciler.reconcile_key(records))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());

                        Err(etl_error!(
                            ErrorKind::ReconcileTaskPanic,
                            "Reconcile task panicked",
                            message
                        ))
                    });

                drop(permit);

                (key, result)
            });
        }

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((key, result)) => {
                    pending.remove(&key);
                    match result {
                        Ok(()) => report.reconciled.push(key),
                        Err(error) => report.failures.push(ReconcileFailure { key, error }),
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "reconcile task did not complete");
                }
            }
        }

        // Keys whose task was cancelled before reporting back.
        for key in pending {
            report.failures.push(ReconcileFailure {
                key,
                error: etl_error!(
                    ErrorKind::ReconcileTaskPanic,
                    "Reconcile task did not complete"
                ),
            });
        }

        info!(
            table = %self.table_schema.name,
            reconciled = report.reconciled.len(),
            failed = report.failures.len(),
            "reconciliation finished"
        );

        report
    }

    async fn reconcile_key(&self, records: Vec<ResolvedRecord>) -> EtlResult<()> {
        for record in records {
            self.reconcile(record).await?;
        }

        Ok(())
    }
}
