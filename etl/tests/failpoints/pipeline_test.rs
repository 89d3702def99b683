use config::shared::PipelineConfig;
use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::failpoints::{PIPELINE_AFTER_CAPTURE_FP, RECONCILE_AFTER_DELETE_FP};
use etl::pipeline::BatchPipeline;
use etl::source::memory::MemoryChangeSource;
use etl::test_utils::change::{after_image, day};
use etl::test_utils::failpoints::CustomFailScenario;
use etl::types::{Cell, TableRow, TableSchema};
use telemetry::tracing::init_test_tracing;

const TABLE: &str = "produk";

fn pipeline_config(max_attempts: u32) -> PipelineConfig {
    let mut config: PipelineConfig =
        serde_json::from_value(serde_json::json!({ "id": 1 })).unwrap();
    config.reconcile.max_concurrency = 1;
    config.reconcile.retry.max_attempts = max_attempts;
    config.reconcile.retry.initial_delay_ms = 0;
    config.reconcile.retry.max_delay_ms = 0;
    config
}

fn pipeline(
    source: &MemoryChangeSource,
    destination: &MemoryDestination,
    max_attempts: u32,
) -> BatchPipeline<MemoryChangeSource, MemoryDestination> {
    BatchPipeline::new(
        pipeline_config(max_attempts),
        source.clone(),
        destination.clone(),
        TableSchema::product(TABLE),
    )
}

fn stale_row(key: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(key),
        Cell::String("Lama".to_string()),
        Cell::F64(1.0),
        Cell::String("2023-01-01 00:00:00".to_string()),
    ])
}

// Failpoints are process-wide, so every scenario lives in one test.
#[tokio::test(flavor = "multi_thread")]
async fn reconciliation_survives_interruptions() {
    init_test_tracing();

    // A crash between delete and append leaves the key missing until the next run.
    {
        let destination = MemoryDestination::new();
        destination.insert_table_rows(TABLE, vec![stale_row(7)]).await;
        let source = MemoryChangeSource::new(vec![after_image(7, day(6, 1), "Baru", 2.0)]);

        let _scenario = CustomFailScenario::setup(&[(RECONCILE_AFTER_DELETE_FP, "1*return")]);
        let report = pipeline(&source, &destination, 1).run().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::WithNoRetry);
        assert!(destination.table_rows(TABLE).await.unwrap().is_empty());

        let report = pipeline(&source, &destination, 1).run().await.unwrap();
        assert!(report.is_success());

        let rows = destination.table_rows(TABLE).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values()[1], Cell::String("Baru".to_string()));
    }

    // A retryable interruption is retried within the same run without duplicating the row.
    {
        let destination = MemoryDestination::new();
        destination.insert_table_rows(TABLE, vec![stale_row(8)]).await;
        let source = MemoryChangeSource::new(vec![after_image(8, day(6, 2), "Baru", 3.0)]);

        let _scenario =
            CustomFailScenario::setup(&[(RECONCILE_AFTER_DELETE_FP, "2*return(retry)")]);
        let report = pipeline(&source, &destination, 3).run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(destination.table_rows(TABLE).await.unwrap().len(), 1);
    }

    // A failure right after capture aborts the batch before the destination is touched.
    {
        let destination = MemoryDestination::new();
        let source = MemoryChangeSource::new(vec![after_image(9, day(6, 3), "Baru", 4.0)]);

        let _scenario = CustomFailScenario::setup(&[(PIPELINE_AFTER_CAPTURE_FP, "return")]);
        let err = pipeline(&source, &destination, 3).run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WithNoRetry);
        assert_eq!(source.captures().await, 1);
        assert!(destination.operations().await.is_empty());
    }
}
