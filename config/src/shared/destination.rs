use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Configuration of the analytical table the resolved records are reconciled into.
///
/// This intentionally does not implement [`Serialize`](serde::Serialize) to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// In-process table, used for dry runs.
    Memory {
        /// Name of the in-memory table.
        table_id: String,
    },
    /// Google BigQuery table.
    BigQuery {
        /// Google Cloud project identifier.
        project_id: String,
        /// BigQuery dataset identifier.
        dataset_id: String,
        /// BigQuery table identifier.
        table_id: String,
        /// Service account key, as JSON.
        ///
        /// When absent, application default credentials are used.
        service_account_key: Option<SecretString>,
    },
}

impl DestinationConfig {
    /// Returns the destination table name.
    pub fn table_id(&self) -> &str {
        match self {
            DestinationConfig::Memory { table_id } => table_id,
            DestinationConfig::BigQuery { table_id, .. } => table_id,
        }
    }

    /// Applies the `--dataset`/`--table` overrides given on the command line.
    ///
    /// A dataset override has no meaning for the memory destination and is rejected.
    pub fn apply_overrides(
        &mut self,
        dataset: Option<String>,
        table: Option<String>,
    ) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::Memory { table_id } => {
                if dataset.is_some() {
                    return Err(ValidationError::invalid(
                        "destination.memory.dataset_id",
                        "the memory destination has no dataset",
                    ));
                }
                if let Some(table) = table {
                    *table_id = table;
                }
            }
            DestinationConfig::BigQuery {
                dataset_id,
                table_id,
                ..
            } => {
                if let Some(dataset) = dataset {
                    *dataset_id = dataset;
                }
                if let Some(table) = table {
                    *table_id = table;
                }
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::Memory { table_id } => {
                require_identifier("destination.memory.table_id", table_id)
            }
            DestinationConfig::BigQuery {
                project_id,
                dataset_id,
                table_id,
                ..
            } => {
                require_identifier("destination.big_query.project_id", project_id)?;
                require_identifier("destination.big_query.dataset_id", dataset_id)?;
                require_identifier("destination.big_query.table_id", table_id)
            }
        }
    }
}

fn require_identifier(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::invalid(
            field,
            "must not contain control characters",
        ));
    }

    Ok(())
}
