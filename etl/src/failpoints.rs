use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Hit after a key's stale row has been deleted and before its fresh row is appended.
pub const RECONCILE_AFTER_DELETE_FP: &str = "reconcile.after_delete";

/// Hit once the change log has been captured, before reduction.
pub const PIPELINE_AFTER_CAPTURE_FP: &str = "pipeline.after_capture";

/// Fails with an injected error when the named failpoint is active.
///
/// The failpoint parameter picks the error kind: `retry` yields a retryable error, anything
/// else a non-retryable one.
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("retry") => ErrorKind::WithRetry,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
