use config::shared::ReconcileConfig;
use etl::reconcile::Reconciler;
use etl::test_utils::bigquery::setup_bigquery_database;
use etl::test_utils::change::{day, resolved};
use etl::types::{PRODUCT_KEY_COLUMN, TableSchema};
use telemetry::tracing::init_test_tracing;

const TABLE: &str = "produk";

#[tokio::test(flavor = "multi_thread")]
async fn reconciling_a_key_twice_leaves_one_row() {
    init_test_tracing();
    let Some(database) = setup_bigquery_database().await else {
        return;
    };

    let reconciler = Reconciler::new(
        database.build_destination(),
        TableSchema::product(TABLE),
        &ReconcileConfig::default(),
    );
    reconciler.prepare().await.unwrap();

    reconciler
        .reconcile(resolved(7, day(1, 1), "Kopi", 10.0))
        .await
        .unwrap();
    reconciler
        .reconcile(resolved(7, day(2, 1), "Kopi", 12.0))
        .await
        .unwrap();

    let count = database
        .count_rows_with_key(TABLE, PRODUCT_KEY_COLUMN, 7, 1)
        .await;
    assert_eq!(count, 1);

    database.drop_dataset().await;
}
