//! Change-data-capture sync binary.
//!
//! Runs one batch: triggers the capture on the source database, reduces the captured change log
//! to the latest state per product and reconciles the destination table with it. Scheduling
//! repeated runs is left to the caller, e.g. a cron job.

use std::process::ExitCode;

use clap::Parser;
use ::config::shared::SyncConfig;
use telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::{DestinationOverrides, load_sync_config};
use crate::core::run_sync_with_config;
use crate::error::{SyncerError, SyncerResult};

mod config;
mod core;
mod error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Destination dataset, overriding the configured one.
    #[arg(long)]
    dataset: Option<String>,

    /// Destination table, overriding the configured one.
    #[arg(long)]
    table: Option<String>,
}

impl From<Args> for DestinationOverrides {
    fn from(args: Args) -> Self {
        DestinationOverrides {
            dataset: args.dataset,
            table: args.table,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn run() -> SyncerResult<()> {
    let args = Args::parse();

    let sync_config = load_sync_config(args.into())?;

    // The flusher must outlive the runtime so the last log lines are written.
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(SyncerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(sync_config))
}

async fn async_main(sync_config: SyncConfig) -> SyncerResult<()> {
    if let Err(err) = run_sync_with_config(sync_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
