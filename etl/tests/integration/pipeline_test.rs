use config::shared::{MalformedRecordPolicy, PipelineConfig};
use etl::destination::memory::{DestinationOperation, MemoryDestination};
use etl::error::ErrorKind;
use etl::pipeline::BatchPipeline;
use etl::source::memory::MemoryChangeSource;
use etl::test_utils::change::{after_image, before_image, day};
use etl::test_utils::fault_destination::{FaultInjectingDestination, FaultOperation};
use etl::types::{Cell, ChangeOperation, ChangeRecord, ProductPayload, TableRow, TableSchema};
use telemetry::tracing::init_test_tracing;

const TABLE: &str = "produk";

fn pipeline_config() -> PipelineConfig {
    let mut config: PipelineConfig =
        serde_json::from_value(serde_json::json!({ "id": 42 })).unwrap();
    config.reconcile.max_concurrency = 4;
    config.reconcile.retry.initial_delay_ms = 0;
    config.reconcile.retry.max_delay_ms = 0;
    config
}

fn product_row(key: i64, name: &str, price: f64, last_updated: &str) -> TableRow {
    TableRow::new(vec![
        Cell::I64(key),
        Cell::String(name.to_string()),
        Cell::F64(price),
        Cell::String(last_updated.to_string()),
    ])
}

async fn run_batch<D>(source: &MemoryChangeSource, destination: D) -> etl::pipeline::BatchReport
where
    D: etl::destination::Destination + Clone + Send + Sync + 'static,
{
    BatchPipeline::new(
        pipeline_config(),
        source.clone(),
        destination,
        TableSchema::product(TABLE),
    )
    .run()
    .await
    .unwrap()
}

fn sorted_rows(mut rows: Vec<TableRow>) -> Vec<TableRow> {
    rows.sort_by_key(|row| match row.values()[0] {
        Cell::I64(key) => key,
        _ => i64::MAX,
    });
    rows
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_replaces_stale_rows_and_leaves_others_untouched() {
    init_test_tracing();
    let destination = MemoryDestination::new();
    destination
        .insert_table_rows(
            TABLE,
            vec![
                product_row(1, "Kopi", 10.0, "2023-12-01 00:00:00"),
                product_row(2, "Teh", 5.0, "2023-12-01 00:00:00"),
                product_row(3, "Gula", 7.0, "2023-12-01 00:00:00"),
            ],
        )
        .await;

    let source = MemoryChangeSource::new(vec![
        after_image(1, day(1, 1), "Kopi", 10.0),
        after_image(1, day(2, 1), "Kopi", 12.0),
        before_image(1, day(2, 1), "Kopi", 10.0),
        after_image(4, day(1, 15), "Susu", 8.0),
    ]);

    let report = run_batch(&source, destination.clone()).await;

    assert!(report.is_success());
    assert_eq!(report.captured, 4);
    assert_eq!(report.resolved, 2);
    assert_eq!(source.captures().await, 1);

    let rows = sorted_rows(destination.table_rows(TABLE).await.unwrap());
    assert_eq!(
        rows,
        vec![
            product_row(1, "Kopi", 12.0, "2024-02-01 00:00:00"),
            product_row(2, "Teh", 5.0, "2023-12-01 00:00:00"),
            product_row(3, "Gula", 7.0, "2023-12-01 00:00:00"),
            product_row(4, "Susu", 8.0, "2024-01-15 00:00:00"),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_a_batch_converges_to_the_same_table() {
    init_test_tracing();
    let destination = MemoryDestination::new();
    let source = MemoryChangeSource::new(vec![
        after_image(1, day(1, 1), "Kopi", 10.0),
        after_image(2, day(1, 2), "Teh", 5.0),
        after_image(2, day(1, 3), "Teh", 6.0),
    ]);

    run_batch(&source, destination.clone()).await;
    let first = sorted_rows(destination.table_rows(TABLE).await.unwrap());

    run_batch(&source, destination.clone()).await;
    let second = sorted_rows(destination.table_rows(TABLE).await.unwrap());

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
    assert_eq!(source.captures().await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn each_resolved_key_is_deleted_before_it_is_appended() {
    init_test_tracing();
    let destination = MemoryDestination::new();
    let source = MemoryChangeSource::new(
        (1..=20)
            .map(|key| after_image(key, day(3, 1), "Produk", key as f64))
            .collect(),
    );

    let report = run_batch(&source, destination.clone()).await;
    assert_eq!(report.reconciled.len(), 20);

    let operations = destination.operations().await;
    assert!(matches!(
        operations.first(),
        Some(DestinationOperation::PrepareTable { .. })
    ));

    for key in 1..=20 {
        let delete = operations
            .iter()
            .position(|op| {
                matches!(op, DestinationOperation::DeleteRowsByKey { key: k, .. } if *k == key)
            })
            .unwrap();
        let append = operations
            .iter()
            .position(|op| match op {
                DestinationOperation::AppendTableRows { rows, .. } => {
                    rows.iter().any(|row| row.values()[0] == Cell::I64(key))
                }
                _ => false,
            })
            .unwrap();
        assert!(delete < append, "key {key} was appended before its delete");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_keys_are_healed_by_the_next_batch() {
    init_test_tracing();
    let destination = FaultInjectingDestination::wrap(MemoryDestination::new());
    destination
        .fail_key(FaultOperation::AppendTableRows, 3, ErrorKind::PermissionDenied)
        .await;
    let source = MemoryChangeSource::new(
        (1..=5)
            .map(|key| after_image(key, day(4, 1), "Produk", 1.0))
            .collect(),
    );

    let report = run_batch(&source, destination.clone()).await;
    assert_eq!(report.reconciled.len(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, 3);

    // The stale row of key 3 is gone but nothing replaced it yet.
    let rows = destination.wrapped().table_rows(TABLE).await.unwrap();
    assert_eq!(rows.len(), 4);

    let healthy = destination.wrapped().clone();
    let report = run_batch(&source, healthy.clone()).await;
    assert!(report.is_success());
    assert_eq!(healthy.table_rows(TABLE).await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_records_are_skipped_by_default() {
    init_test_tracing();
    let destination = MemoryDestination::new();
    let source = MemoryChangeSource::new(vec![
        ChangeRecord {
            operation: ChangeOperation::UpdateAfter,
            key: Some(9),
            payload: ProductPayload::default(),
            changed_at: None,
        },
        after_image(1, day(5, 1), "Kopi", 3.0),
    ]);

    let report = run_batch(&source, destination.clone()).await;

    assert_eq!(report.resolved, 1);
    assert_eq!(destination.table_rows(TABLE).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_records_abort_before_any_write_under_fail_policy() {
    init_test_tracing();
    let destination = MemoryDestination::new();
    let source = MemoryChangeSource::new(vec![
        after_image(1, day(5, 1), "Kopi", 3.0),
        ChangeRecord {
            operation: ChangeOperation::UpdateAfter,
            key: None,
            payload: ProductPayload::default(),
            changed_at: Some(day(5, 2)),
        },
    ]);

    let mut config = pipeline_config();
    config.malformed_records = MalformedRecordPolicy::Fail;
    let err = BatchPipeline::new(
        config,
        source,
        destination.clone(),
        TableSchema::product(TABLE),
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(destination.operations().await.is_empty());
}
