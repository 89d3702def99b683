use config::shared::{
    DestinationConfig, PgConnectionConfig, PipelineConfig, SourceConfig, SyncConfig,
};
use etl::destination::Destination;
use etl::destination::bigquery::{BigQueryCredentials, BigQueryDestination};
use etl::destination::memory::MemoryDestination;
use etl::pipeline::{BatchPipeline, BatchReport};
use etl::source::postgres::PgChangeSource;
use etl::types::TableSchema;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::error::{SyncerError, SyncerResult};

/// Runs one batch with the destination named in the configuration.
///
/// Returns an error if the batch aborted or if any key could not be reconciled.
pub async fn run_sync_with_config(sync_config: SyncConfig) -> SyncerResult<BatchReport> {
    info!("starting sync");

    log_config(&sync_config);

    let SyncConfig {
        source,
        destination,
        pipeline,
    } = sync_config;
    let table_schema = TableSchema::product(destination.table_id());

    // Static dispatch over the destinations, hence one arm per destination.
    let report = match destination {
        DestinationConfig::Memory { .. } => {
            let table_id = table_schema.name.clone();
            let destination = MemoryDestination::new();
            let report = run_batch(source, pipeline, destination.clone(), table_schema).await?;

            // The memory table starts empty on every run, so it only shows what this batch wrote.
            let rows = destination.table_rows(&table_id).await.unwrap_or_default();
            info!(%table_id, rows = rows.len(), "memory table written");

            report
        }
        DestinationConfig::BigQuery {
            project_id,
            dataset_id,
            service_account_key,
            ..
        } => {
            let credentials = match service_account_key {
                Some(key) => BigQueryCredentials::ServiceAccountKey(key),
                None => BigQueryCredentials::ApplicationDefault,
            };
            let destination = BigQueryDestination::new(project_id, dataset_id, credentials);

            run_batch(source, pipeline, destination, table_schema).await?
        }
    };

    info!(
        captured = report.captured,
        resolved = report.resolved,
        reconciled = report.reconciled.len(),
        "sync completed"
    );

    Ok(report)
}

/// Runs the batch until it finishes or a termination signal arrives.
///
/// An interrupted run is abandoned as is. Nothing needs undoing: the next run captures again and
/// reconciling a key twice converges.
#[tracing::instrument(skip_all, fields(pipeline_id = pipeline_config.id))]
async fn run_batch<D>(
    source_config: SourceConfig,
    pipeline_config: PipelineConfig,
    destination: D,
    table_schema: TableSchema,
) -> SyncerResult<BatchReport>
where
    D: Destination + Clone + Send + Sync + 'static,
{
    let source = PgChangeSource::new(source_config);
    let pipeline = BatchPipeline::new(pipeline_config, source, destination.clone(), table_schema);

    // Listen for SIGTERM, sent by schedulers before killing the process.
    let mut sigterm = signal(SignalKind::terminate())?;

    let result = tokio::select! {
        result = pipeline.run() => result.map_err(SyncerError::from),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("sigint (ctrl+c) received, abandoning the batch");
            Err(SyncerError::Interrupted("sigint"))
        }
        _ = sigterm.recv() => {
            warn!("sigterm received, abandoning the batch");
            Err(SyncerError::Interrupted("sigterm"))
        }
    };

    if let Err(err) = destination.shutdown().await {
        warn!(error = %err, destination = D::name(), "failed to shut down destination");
    }

    let report = result?.into_result()?;

    Ok(report)
}

fn log_config(config: &SyncConfig) {
    log_source_config(&config.source);
    log_destination_config(&config.destination);
    log_pipeline_config(&config.pipeline);
}

fn log_source_config(config: &SourceConfig) {
    debug!(
        capture_procedure = %config.capture_procedure,
        staging_table = %config.staging_table,
        "source config"
    );
    log_pg_connection_config(&config.connection);
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "source postgres connection config",
    );
}

fn log_destination_config(config: &DestinationConfig) {
    match config {
        DestinationConfig::Memory { table_id } => {
            debug!(table_id, "using memory destination config");
        }
        DestinationConfig::BigQuery {
            project_id,
            dataset_id,
            table_id,
            service_account_key,
        } => {
            debug!(
                project_id,
                dataset_id,
                table_id,
                application_default_credentials = service_account_key.is_none(),
                "using bigquery destination config"
            )
        }
    }
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        pipeline_id = config.id,
        malformed_records = ?config.malformed_records,
        max_concurrency = config.reconcile.max_concurrency,
        max_attempts = config.reconcile.retry.max_attempts,
        initial_delay_ms = config.reconcile.retry.initial_delay_ms,
        max_delay_ms = config.reconcile.retry.max_delay_ms,
        "pipeline config"
    );
}
