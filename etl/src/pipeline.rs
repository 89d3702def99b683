//! One batch run: capture, reduce, reconcile.

use std::fmt;

use config::shared::PipelineConfig;
use tracing::{error, info};

use crate::destination::Destination;
use crate::error::{EtlError, EtlResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PIPELINE_AFTER_CAPTURE_FP, etl_fail_point};
use crate::reconcile::{ReconcileFailure, ReconcileReport, Reconciler};
use crate::reducer::reduce;
use crate::source::ChangeSource;
use crate::types::{ProductKey, TableSchema};

pub type PipelineId = u64;

/// Stage reached by a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Start,
    Capture,
    Reduce,
    Reconcile,
    Done,
    Failed,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Start => "start",
            BatchPhase::Capture => "capture",
            BatchPhase::Reduce => "reduce",
            BatchPhase::Reconcile => "reconcile",
            BatchPhase::Done => "done",
            BatchPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a batch that went through every stage.
///
/// Reconciliation failures are per key and listed in `failures`; the batch itself completed.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub pipeline_id: PipelineId,
    /// Rows read from the change log.
    pub captured: usize,
    /// Distinct keys left after reduction.
    pub resolved: usize,
    pub reconciled: Vec<ProductKey>,
    pub failures: Vec<ReconcileFailure>,
}

impl BatchReport {
    fn new(
        pipeline_id: PipelineId,
        captured: usize,
        resolved: usize,
        reconcile: ReconcileReport,
    ) -> Self {
        Self {
            pipeline_id,
            captured,
            resolved,
            reconciled: reconcile.reconciled,
            failures: reconcile.failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the report if every key was reconciled, or an error listing each failed key.
    pub fn into_result(self) -> EtlResult<BatchReport> {
        if self.failures.is_empty() {
            return Ok(self);
        }

        let mut failures = self.failures;
        failures.sort_by_key(|failure| failure.key);

        let errors: Vec<EtlError> = failures
            .into_iter()
            .map(ReconcileFailure::into_error)
            .collect();

        Err(errors.into())
    }
}

/// A single sync run from a change source into a destination table.
///
/// The pipeline is consumed by [`BatchPipeline::run`]: nothing is kept between runs and the
/// next run captures from scratch. Runs of the same job must not overlap, which is left to
/// whatever schedules them.
#[derive(Debug)]
pub struct BatchPipeline<S, D> {
    id: PipelineId,
    config: PipelineConfig,
    source: S,
    destination: D,
    table_schema: TableSchema,
}

impl<S, D> BatchPipeline<S, D>
where
    S: ChangeSource + Send + Sync,
    D: Destination + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: PipelineConfig,
        source: S,
        destination: D,
        table_schema: TableSchema,
    ) -> Self {
        Self {
            id: config.id,
            config,
            source,
            destination,
            table_schema,
        }
    }

    /// Runs the batch to completion.
    ///
    /// Capture, reduction and table preparation failures abort the run and are returned as
    /// errors. Failures of individual keys are collected in the returned report instead, see
    /// [`BatchReport::into_result`].
    pub async fn run(self) -> EtlResult<BatchReport> {
        let pipeline_id = self.id;

        let result = self.run_stages().await;
        if let Err(err) = &result {
            error!(pipeline_id, phase = %BatchPhase::Failed, error = %err, "batch failed");
        }

        result
    }

    async fn run_stages(self) -> EtlResult<BatchReport> {
        let pipeline_id = self.id;
        info!(
            pipeline_id,
            phase = %BatchPhase::Start,
            source = S::name(),
            destination = D::name(),
            table = %self.table_schema.name,
            "starting batch"
        );

        info!(pipeline_id, phase = %BatchPhase::Capture, "capturing changes");
        let records = self.source.capture_and_fetch().await?;
        let captured = records.len();

        #[cfg(feature = "failpoints")]
        etl_fail_point(PIPELINE_AFTER_CAPTURE_FP)?;

        info!(pipeline_id, phase = %BatchPhase::Reduce, captured, "reducing change log");
        let resolved = reduce(records, self.config.malformed_records)?;
        let resolved_count = resolved.len();

        // An empty batch never reaches the destination, not even to create the table.
        if resolved.is_empty() {
            info!(
                pipeline_id,
                phase = %BatchPhase::Done,
                captured,
                resolved = 0,
                "nothing to reconcile"
            );

            return Ok(BatchReport::new(
                pipeline_id,
                captured,
                0,
                ReconcileReport::default(),
            ));
        }

        info!(
            pipeline_id,
            phase = %BatchPhase::Reconcile,
            resolved = resolved_count,
            "reconciling records"
        );
        let reconciler =
            Reconciler::new(self.destination, self.table_schema, &self.config.reconcile);
        reconciler.prepare().await?;
        let reconcile_report = reconciler.reconcile_all(resolved).await;

        let report = BatchReport::new(pipeline_id, captured, resolved_count, reconcile_report);
        info!(
            pipeline_id,
            phase = %BatchPhase::Done,
            captured = report.captured,
            resolved = report.resolved,
            reconciled = report.reconciled.len(),
            failed = report.failures.len(),
            "batch finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use config::shared::MalformedRecordPolicy;

    use super::*;
    use crate::destination::memory::{DestinationOperation, MemoryDestination};
    use crate::error::ErrorKind;
    use crate::source::memory::MemoryChangeSource;
    use crate::test_utils::change::{after_image, before_image, second};
    use crate::test_utils::fault_destination::{FaultInjectingDestination, FaultOperation};
    use crate::types::{Cell, ChangeOperation, ChangeRecord, ProductPayload};

    const TABLE: &str = "produk";

    fn config(policy: MalformedRecordPolicy) -> PipelineConfig {
        let mut config: PipelineConfig =
            serde_json::from_value(serde_json::json!({ "id": 7 })).unwrap();
        config.malformed_records = policy;
        config.reconcile.retry.initial_delay_ms = 0;
        config.reconcile.retry.max_delay_ms = 0;
        config
    }

    fn pipeline<D>(
        records: Vec<ChangeRecord>,
        destination: D,
    ) -> BatchPipeline<MemoryChangeSource, D>
    where
        D: Destination + Clone + Send + Sync + 'static,
    {
        BatchPipeline::new(
            config(MalformedRecordPolicy::Skip),
            MemoryChangeSource::new(records),
            destination,
            TableSchema::product(TABLE),
        )
    }

    #[tokio::test]
    async fn latest_after_image_is_reconciled() {
        let destination = MemoryDestination::new();
        let records = vec![
            after_image(5, second(1), "A", 9.0),
            after_image(5, second(2), "A", 11.0),
            before_image(5, second(2), "A", 9.0),
        ];

        let report = pipeline(records, destination.clone()).run().await.unwrap();

        assert!(report.is_success());
        assert_eq!((report.captured, report.resolved), (3, 1));
        assert_eq!(report.reconciled, vec![5]);

        let operations = destination.operations().await;
        let deletes: Vec<_> = operations
            .iter()
            .filter(|op| matches!(op, DestinationOperation::DeleteRowsByKey { key: 5, .. }))
            .collect();
        assert_eq!(deletes.len(), 1);

        let rows = destination.table_rows(TABLE).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values()[2], Cell::F64(11.0));
    }

    #[tokio::test]
    async fn empty_capture_succeeds_without_touching_the_destination() {
        let destination = MemoryDestination::new();

        let report = pipeline(Vec::new(), destination.clone()).run().await.unwrap();

        assert!(report.is_success());
        assert_eq!((report.captured, report.resolved), (0, 0));
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn log_without_after_images_succeeds_without_touching_the_destination() {
        let destination = MemoryDestination::new();
        let records = vec![before_image(1, second(1), "A", 1.0)];

        let report = pipeline(records, destination.clone()).run().await.unwrap();

        assert_eq!((report.captured, report.resolved), (1, 0));
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_records_abort_the_batch_when_configured() {
        let destination = MemoryDestination::new();
        let records = vec![ChangeRecord {
            operation: ChangeOperation::UpdateAfter,
            key: None,
            payload: ProductPayload::default(),
            changed_at: Some(second(1)),
        }];

        let err = BatchPipeline::new(
            config(MalformedRecordPolicy::Fail),
            MemoryChangeSource::new(records),
            destination.clone(),
            TableSchema::product(TABLE),
        )
        .run()
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn table_preparation_failure_aborts_the_batch() {
        let destination = FaultInjectingDestination::wrap(MemoryDestination::new());
        destination
            .fail_times(FaultOperation::PrepareTable, 1, ErrorKind::PermissionDenied)
            .await;

        let err = pipeline(vec![after_image(1, second(1), "A", 1.0)], destination.clone())
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(destination.calls(FaultOperation::DeleteRowsByKey).await, 0);
    }

    #[tokio::test]
    async fn key_failures_are_reported_with_their_keys() {
        let destination = FaultInjectingDestination::wrap(MemoryDestination::new());
        destination
            .fail_key(FaultOperation::DeleteRowsByKey, 2, ErrorKind::PermissionDenied)
            .await;
        destination
            .fail_key(FaultOperation::AppendTableRows, 4, ErrorKind::InvalidData)
            .await;
        let records = (1..=5)
            .map(|key| after_image(key, second(1), "A", 1.0))
            .collect();

        let report = pipeline(records, destination.clone()).run().await.unwrap();

        assert_eq!(report.reconciled.len(), 3);
        let err = report.into_result().unwrap_err();
        let errors = err.errors().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind(), ErrorKind::PermissionDenied);
        assert!(errors[0].detail().unwrap().starts_with("Key 2 "));
        assert_eq!(errors[1].kind(), ErrorKind::InvalidData);
        assert!(errors[1].detail().unwrap().starts_with("Key 4 "));
    }
}
