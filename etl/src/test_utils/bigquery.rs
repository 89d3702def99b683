//! Test utilities for the BigQuery destination.
//!
//! Tests needing a real project read `TESTS_BIGQUERY_PROJECT_ID` and
//! `TESTS_BIGQUERY_SA_KEY_PATH`, and are skipped when either is missing.

use std::time::Duration;

use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::model::dataset::Dataset;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use secrecy::SecretString;
use tokio::time::sleep;

use crate::destination::bigquery::{
    BigQueryCredentials, BigQueryDestination, install_crypto_provider,
};
use crate::types::ProductKey;

/// Maximum number of times a verification query is re-run.
const BIGQUERY_QUERY_MAX_ATTEMPTS: u32 = 30;
/// Delay between verification attempts.
const BIGQUERY_QUERY_RETRY_DELAY_MS: u64 = 500;

pub const BIGQUERY_PROJECT_ID_ENV: &str = "TESTS_BIGQUERY_PROJECT_ID";

pub const BIGQUERY_SA_KEY_PATH_ENV: &str = "TESTS_BIGQUERY_SA_KEY_PATH";

/// Generates a unique dataset id for test isolation.
pub fn random_dataset_id() -> String {
    format!("cdc_tests_{:016x}", rand::random::<u64>())
}

/// A dataset created for one test, dropped by [`BigQueryDatabase::drop_dataset`].
pub struct BigQueryDatabase {
    client: Client,
    project_id: String,
    sa_key_path: String,
    dataset_id: String,
}

impl BigQueryDatabase {
    /// Drops the dataset and all its tables.
    ///
    /// Errors are printed and otherwise ignored.
    pub async fn drop_dataset(self) {
        if let Err(e) = self
            .client
            .dataset()
            .delete(&self.project_id, &self.dataset_id, true)
            .await
        {
            eprintln!(
                "warning: failed to delete BigQuery dataset {}: {e}",
                self.dataset_id
            );
        }
    }

    /// Builds a destination writing into this dataset with the service account key.
    pub fn build_destination(&self) -> BigQueryDestination {
        let sa_key = std::fs::read_to_string(&self.sa_key_path).unwrap_or_else(|_| {
            panic!(
                "Failed to read service account key file at {}",
                self.sa_key_path
            )
        });

        BigQueryDestination::new(
            self.project_id.clone(),
            self.dataset_id.clone(),
            BigQueryCredentials::ServiceAccountKey(SecretString::new(sa_key)),
        )
    }

    /// Counts the rows of `table_id` holding `key` in the key column `key_column`.
    ///
    /// Polls until the count equals `expected` or the retry budget is exhausted, and returns
    /// the last count seen.
    pub async fn count_rows_with_key(
        &self,
        table_id: &str,
        key_column: &str,
        key: ProductKey,
        expected: i64,
    ) -> i64 {
        let query = format!(
            "select count(*) from `{}.{}.{}` where {key_column} = {key}",
            self.project_id, self.dataset_id, table_id
        );
        let mut attempts_remaining = BIGQUERY_QUERY_MAX_ATTEMPTS;

        loop {
            let response = self
                .client
                .job()
                .query(&self.project_id, QueryRequest::new(query.clone()))
                .await
                .unwrap();
            let mut result_set = ResultSet::new_from_query_response(response);
            let count = if result_set.next_row() {
                result_set.get_i64(0).unwrap().unwrap_or(0)
            } else {
                0
            };

            if count == expected || attempts_remaining == 1 {
                return count;
            }

            attempts_remaining -= 1;
            sleep(Duration::from_millis(BIGQUERY_QUERY_RETRY_DELAY_MS)).await;
        }
    }
}

/// Creates a fresh dataset in the test project.
///
/// Returns `None` when the test project is not configured.
///
/// # Panics
///
/// Panics if the client or the dataset cannot be created.
pub async fn setup_bigquery_database() -> Option<BigQueryDatabase> {
    let project_id = std::env::var(BIGQUERY_PROJECT_ID_ENV).ok()?;
    let sa_key_path = std::env::var(BIGQUERY_SA_KEY_PATH_ENV).ok()?;

    install_crypto_provider();
    let client = ClientBuilder::new()
        .build_from_service_account_key_file(&sa_key_path)
        .await
        .expect("Failed to create BigQuery client");
    let dataset_id = random_dataset_id();

    client
        .dataset()
        .create(Dataset::new(&project_id, &dataset_id))
        .await
        .expect("Failed to create dataset");

    Some(BigQueryDatabase {
        client,
        project_id,
        sa_key_path,
        dataset_id,
    })
}
