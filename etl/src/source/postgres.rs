use chrono::NaiveDateTime;
use config::shared::{QualifiedName, SOURCE_CAPTURE_OPTIONS, SourceConfig};
use pg_escape::quote_identifier;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use crate::error::{EtlError, EtlResult};
use crate::etl_error;
use crate::source::ChangeSource;
use crate::types::{
    ChangeRecord, PRODUCT_KEY_COLUMN, PRODUCT_NAME_COLUMN, PRODUCT_PRICE_COLUMN,
    PRODUCT_UPDATED_AT_COLUMN, ProductKey, ProductPayload,
};

/// Column of the staging log holding the operation tag.
const OPERATION_COLUMN: &str = "operasi";

/// One row of the staging log as stored by the capture procedure.
#[derive(Debug, FromRow)]
struct StagingRow {
    operasi: String,
    idproduk: Option<ProductKey>,
    namaproduk: Option<String>,
    hargaproduk: Option<f64>,
    tanggalupdate: Option<NaiveDateTime>,
}

impl From<StagingRow> for ChangeRecord {
    fn from(row: StagingRow) -> Self {
        ChangeRecord {
            operation: row.operasi.into(),
            key: row.idproduk,
            payload: ProductPayload {
                name: row.namaproduk,
                price: row.hargaproduk,
            },
            changed_at: row.tanggalupdate,
        }
    }
}

/// Change source backed by a Postgres capture procedure and staging table.
///
/// No connection is held between captures: each call opens a single-connection pool, runs the
/// capture procedure and the staging read on it, then closes it.
#[derive(Debug, Clone)]
pub struct PgChangeSource {
    config: SourceConfig,
}

impl PgChangeSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> EtlResult<PgPool> {
        let options = self
            .config
            .connection
            .with_db(Some(&*SOURCE_CAPTURE_OPTIONS));

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    async fn capture(&self, pool: &PgPool) -> EtlResult<()> {
        let statement = capture_statement(&self.config.capture_procedure);
        debug!(%statement, "triggering change capture");

        sqlx::query(&statement).execute(pool).await?;

        Ok(())
    }

    async fn fetch(&self, pool: &PgPool) -> EtlResult<Vec<ChangeRecord>> {
        let statement = staging_read_statement(&self.config.staging_table);
        debug!(%statement, "reading staging log");

        let rows: Vec<StagingRow> = sqlx::query_as(&statement).fetch_all(pool).await?;

        Ok(rows.into_iter().map(ChangeRecord::from).collect())
    }
}

impl ChangeSource for PgChangeSource {
    fn name() -> &'static str {
        "postgres"
    }

    async fn capture_and_fetch(&self) -> EtlResult<Vec<ChangeRecord>> {
        let pool = self.connect().await.map_err(capture_failed)?;

        let result = async {
            self.capture(&pool).await?;
            self.fetch(&pool).await
        }
        .await;
        pool.close().await;

        let records = result.map_err(capture_failed)?;
        info!(
            records = records.len(),
            staging_table = %self.config.staging_table,
            "change log captured"
        );

        Ok(records)
    }
}

/// Wraps a source error so the batch report names the failed stage, keeping the original
/// classification.
fn capture_failed(err: EtlError) -> EtlError {
    let detail = match (err.description(), err.detail()) {
        (Some(description), Some(detail)) => format!("{description}: {detail}"),
        (Some(description), None) => description.to_string(),
        (None, _) => err.to_string(),
    };
    etl_error!(err.kind(), "Change capture failed", detail, source: err)
}

fn quote_qualified_name(name: &QualifiedName) -> String {
    match &name.schema {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(&name.name)
        ),
        None => quote_identifier(&name.name).to_string(),
    }
}

fn capture_statement(procedure: &QualifiedName) -> String {
    format!("call {}()", quote_qualified_name(procedure))
}

fn staging_read_statement(table: &QualifiedName) -> String {
    format!(
        "select {op}, {key}::int8 as {key}, {name}::text as {name}, {price}::float8 as {price}, \
         {updated}::timestamp as {updated} from {table}",
        op = OPERATION_COLUMN,
        key = PRODUCT_KEY_COLUMN,
        name = PRODUCT_NAME_COLUMN,
        price = PRODUCT_PRICE_COLUMN,
        updated = PRODUCT_UPDATED_AT_COLUMN,
        table = quote_qualified_name(table),
    )
}
