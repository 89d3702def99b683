use std::time::Duration;

use config::shared::{PipelineConfig, SOURCE_CAPTURE_OPTIONS};
use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::pipeline::BatchPipeline;
use etl::source::ChangeSource;
use etl::source::postgres::PgChangeSource;
use etl::test_utils::change::{after_image, before_image, second};
use etl::test_utils::database::{PgDatabase, spawn_source_database};
use etl::types::{Cell, ChangeRecord, ProductPayload, TableRow, TableSchema};
use telemetry::tracing::init_test_tracing;

const CAPTURE_PROCEDURE: &str = "usp_capture_produk_cdc";
const STAGING_TABLE: &str = "staging_produk_cdc";

/// Creates a pending change table, an empty staging table and a procedure moving the pending
/// rows into the staging table.
async fn create_capture_objects(database: &PgDatabase) {
    database
        .run_statements(&[
            "create table test.pending_produk_changes (
                operasi varchar(20) not null,
                idproduk int,
                namaproduk varchar(100),
                hargaproduk numeric(12, 2),
                tanggalupdate timestamp
            )",
            "create table test.staging_produk_cdc (like test.pending_produk_changes)",
            "create procedure test.usp_capture_produk_cdc()
            language plpgsql
            as $$
            begin
                insert into test.staging_produk_cdc select * from test.pending_produk_changes;
                delete from test.pending_produk_changes;
            end
            $$",
            "insert into test.pending_produk_changes values
                ('UPDATE - BEFORE', 1, 'Kopi', 10000.00, '2024-01-01 00:00:05'),
                ('UPDATE - AFTER', 1, 'Kopi Susu', 12500.50, '2024-01-01 00:00:05'),
                ('UPDATE - AFTER', 2, null, null, '2024-01-01 00:00:09')",
        ])
        .await;
}

async fn count_rows(database: &PgDatabase, table: &str) -> i64 {
    sqlx::query_scalar(&format!("select count(*) from {table}"))
        .fetch_one(&database.pool)
        .await
        .unwrap()
}

/// Counts the sessions the change source opened on the test database.
async fn capture_sessions(database: &PgDatabase) -> i64 {
    sqlx::query_scalar(
        "select count(*) from pg_stat_activity where datname = $1 and application_name = $2",
    )
    .bind(&database.config.name)
    .bind(&SOURCE_CAPTURE_OPTIONS.application_name)
    .fetch_one(&database.pool)
    .await
    .unwrap()
}

/// Waits for the backends of closed capture sessions to exit.
async fn assert_no_capture_sessions(database: &PgDatabase) {
    for _ in 0..40 {
        if capture_sessions(database).await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("capture session still open after the capture returned");
}

fn sorted_records(mut records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    records.sort_by(|a, b| {
        (a.key, a.operation.as_str()).cmp(&(b.key, b.operation.as_str()))
    });
    records
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_runs_the_procedure_before_reading_the_staging_table() {
    init_test_tracing();
    let Some(database) = spawn_source_database().await else {
        return;
    };
    create_capture_objects(&database).await;

    let source = PgChangeSource::new(database.source_config(CAPTURE_PROCEDURE, STAGING_TABLE));
    let records = source.capture_and_fetch().await.unwrap();

    let mut without_payload = after_image(2, second(9), "", 0.0);
    without_payload.payload = ProductPayload::default();
    assert_eq!(
        sorted_records(records),
        vec![
            after_image(1, second(5), "Kopi Susu", 12500.5),
            before_image(1, second(5), "Kopi", 10000.0),
            without_payload,
        ]
    );
    assert_eq!(count_rows(&database, "test.pending_produk_changes").await, 0);
    assert_no_capture_sessions(&database).await;

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_procedure_fails_the_capture_and_closes_the_session() {
    init_test_tracing();
    let Some(database) = spawn_source_database().await else {
        return;
    };
    database
        .run_statements(&[
            "create table test.staging_produk_cdc (
                operasi varchar(20) not null,
                idproduk int,
                namaproduk varchar(100),
                hargaproduk numeric(12, 2),
                tanggalupdate timestamp
            )",
            "create procedure test.usp_capture_produk_cdc()
            language plpgsql
            as $$
            begin
                raise exception 'change log unavailable';
            end
            $$",
        ])
        .await;

    let source = PgChangeSource::new(database.source_config(CAPTURE_PROCEDURE, STAGING_TABLE));
    let err = source.capture_and_fetch().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(err.description(), Some("Change capture failed"));
    assert!(err.detail().unwrap().contains("change log unavailable"));
    assert_no_capture_sessions(&database).await;

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_staging_table_is_a_schema_error() {
    init_test_tracing();
    let Some(database) = spawn_source_database().await else {
        return;
    };
    database
        .run_statements(&["create procedure test.usp_capture_produk_cdc()
            language plpgsql
            as $$
            begin
            end
            $$"])
        .await;

    let source = PgChangeSource::new(database.source_config(CAPTURE_PROCEDURE, STAGING_TABLE));
    let err = source.capture_and_fetch().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceSchemaError);
    assert_no_capture_sessions(&database).await;

    database.drop_database().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_from_postgres_reconciles_the_latest_after_images() {
    init_test_tracing();
    let Some(database) = spawn_source_database().await else {
        return;
    };
    create_capture_objects(&database).await;

    let config: PipelineConfig = serde_json::from_value(serde_json::json!({ "id": 7 })).unwrap();
    let destination = MemoryDestination::new();
    let report = BatchPipeline::new(
        config,
        PgChangeSource::new(database.source_config(CAPTURE_PROCEDURE, STAGING_TABLE)),
        destination.clone(),
        TableSchema::product("produk"),
    )
    .run()
    .await
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.captured, 3);
    assert_eq!(report.resolved, 2);

    let mut rows = destination.table_rows("produk").await.unwrap();
    rows.sort_by_key(|row| match row.values()[0] {
        Cell::I64(key) => key,
        _ => i64::MAX,
    });
    assert_eq!(
        rows,
        vec![
            TableRow::new(vec![
                Cell::I64(1),
                Cell::String("Kopi Susu".to_string()),
                Cell::F64(12500.5),
                Cell::String("2024-01-01 00:00:05".to_string()),
            ]),
            TableRow::new(vec![
                Cell::I64(2),
                Cell::Null,
                Cell::Null,
                Cell::String("2024-01-01 00:00:09".to_string()),
            ]),
        ]
    );

    database.drop_database().await;
}
