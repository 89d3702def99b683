use crate::error::EtlError;
use crate::etl_error;
use crate::types::ProductKey;

/// A key whose reconciliation failed after all its attempts.
#[derive(Debug, Clone)]
pub struct ReconcileFailure {
    pub key: ProductKey,
    pub error: EtlError,
}

impl ReconcileFailure {
    /// Converts the failure into an error naming the key, keeping the kind of the cause.
    pub fn into_error(self) -> EtlError {
        let key = self.key;
        let cause = match (self.error.description(), self.error.detail()) {
            (Some(description), Some(detail)) => format!("{description}: {detail}"),
            (Some(description), None) => description.to_string(),
            (None, _) => self.error.to_string(),
        };

        etl_error!(
            self.error.kind(),
            "Reconciliation failed",
            format!("Key {key} could not be reconciled: {cause}"),
            source: self.error
        )
    }
}

/// Outcome of reconciling the records of a batch.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Keys reconciled successfully, in completion order.
    pub reconciled: Vec<ProductKey>,
    /// Keys that failed, in completion order.
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the failed keys in ascending order.
    pub fn failed_keys(&self) -> Vec<ProductKey> {
        let mut keys: Vec<_> = self.failures.iter().map(|f| f.key).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn failure_error_names_the_key() {
        let failure = ReconcileFailure {
            key: 9,
            error: etl_error!(
                ErrorKind::PermissionDenied,
                "BigQuery permission denied",
                "missing bigquery.tables.updateData"
            ),
        };

        let err = failure.into_error();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            err.detail(),
            Some(
                "Key 9 could not be reconciled: BigQuery permission denied: \
                 missing bigquery.tables.updateData"
            )
        );
    }
}
