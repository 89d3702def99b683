use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used for every target when `RUST_LOG` is unset.
const DEFAULT_LOG_LEVEL: &str = "info";

static TEST_TRACING: Once = Once::new();

/// Errors returned by [`init_tracing`].
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogBridge(#[source] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[source] tracing::subscriber::SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Must be held until the process is about to exit, otherwise the tail of the log is lost.
#[must_use = "dropping the flusher stops the background log writer"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber of a binary.
///
/// Log lines go to stdout through a background writer. The filter comes from `RUST_LOG` and
/// falls back to `info`. Records emitted through the `log` crate are forwarded to tracing.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init().map_err(TracingError::LogBridge)?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(true));
    tracing::subscriber::set_global_default(subscriber).map_err(TracingError::Subscriber)?;

    tracing::info!(app_name, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber writing through the test harness capture, once per test binary.
///
/// Logs only show up when `RUST_LOG` is set, so passing tests stay quiet.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_test_writer())
                .try_init();
        }
    });
}
