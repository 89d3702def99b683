use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use etl::error::EtlError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type SyncerResult<T> = Result<T, SyncerError>;

/// Backtrace captured when a non-sync error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the `syncer` binary.
///
/// Wraps [`EtlError`] for failures of the batch itself and adds the failures of the process
/// around it.
#[derive(Debug)]
pub enum SyncerError {
    /// The batch failed or some keys could not be reconciled.
    Etl(EtlError),
    /// Configuration could not be loaded or is invalid.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, e.g. while building the runtime or registering signal handlers.
    Io(std::io::Error, CapturedBacktrace),
    /// The run was abandoned on a termination signal.
    Interrupted(&'static str),
}

impl SyncerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            SyncerError::Etl(_) => "sync error",
            SyncerError::Config(_, _) => "configuration error",
            SyncerError::Io(_, _) => "i/o error",
            SyncerError::Interrupted(_) => "interrupted",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            SyncerError::Etl(err) => err.backtrace(),
            SyncerError::Config(_, cb) => Some(&cb.0),
            SyncerError::Io(_, cb) => Some(&cb.0),
            SyncerError::Interrupted(_) => None,
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        SyncerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report of the failure for terminal output.
    ///
    /// Aggregated sync errors list one line per failed key, so their cause chain is not
    /// repeated.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("syncer failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        if !matches!(self, SyncerError::Etl(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for SyncerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerError::Etl(err) => write!(f, "{err}"),
            SyncerError::Config(source, _) => write!(f, "configuration error: {source}"),
            SyncerError::Io(source, _) => write!(f, "i/o error: {source}"),
            SyncerError::Interrupted(signal) => write!(f, "run abandoned after {signal}"),
        }
    }
}

impl Error for SyncerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncerError::Etl(err) => err.source(),
            SyncerError::Config(source, _) => Some(source.as_ref()),
            SyncerError::Io(source, _) => Some(source),
            SyncerError::Interrupted(_) => None,
        }
    }
}

impl From<std::io::Error> for SyncerError {
    fn from(err: std::io::Error) -> Self {
        SyncerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<EtlError> for SyncerError {
    fn from(err: EtlError) -> Self {
        SyncerError::Etl(err)
    }
}
