use std::future::Future;

use crate::error::EtlResult;
use crate::types::ChangeRecord;

/// Trait for systems that produce the change log of one capture cycle.
///
/// Implementations must finish triggering the capture before reading the log, and must fail
/// the whole call rather than return a partial log: there is no partial-capture mode.
pub trait ChangeSource {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Triggers the capture of pending changes and reads the resulting change log.
    fn capture_and_fetch(&self) -> impl Future<Output = EtlResult<Vec<ChangeRecord>>> + Send;
}
