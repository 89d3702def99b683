use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use crate::destination::Destination;
use crate::destination::bigquery::{BigQueryClient, install_crypto_provider};
use crate::error::{EtlError, EtlResult};
use crate::types::{ProductKey, TableRow, TableSchema};

/// How the BigQuery client authenticates.
#[derive(Clone)]
pub enum BigQueryCredentials {
    /// A service account key, as JSON.
    ServiceAccountKey(SecretString),
    /// Application Default Credentials of the environment.
    ApplicationDefault,
}

impl fmt::Debug for BigQueryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BigQueryCredentials::ServiceAccountKey(_) => f.write_str("ServiceAccountKey(..)"),
            BigQueryCredentials::ApplicationDefault => f.write_str("ApplicationDefault"),
        }
    }
}

/// BigQuery destination writing the tables of one dataset.
///
/// The client is created on first use and shared by every clone of the destination, so all
/// reconciliations of a batch reuse one authenticated client. Queries run concurrently under
/// a read lock; appends take the write lock because the storage write stream needs exclusive
/// access to the client.
#[derive(Debug, Clone)]
pub struct BigQueryDestination {
    project_id: String,
    dataset_id: String,
    credentials: BigQueryCredentials,
    client: Arc<OnceCell<RwLock<BigQueryClient>>>,
}

impl BigQueryDestination {
    pub fn new(project_id: String, dataset_id: String, credentials: BigQueryCredentials) -> Self {
        Self {
            project_id,
            dataset_id,
            credentials,
            client: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the shared client, creating it on the first call.
    async fn client(&self) -> EtlResult<&RwLock<BigQueryClient>> {
        self.client
            .get_or_try_init(|| async {
                install_crypto_provider();

                let project_id = self.project_id.clone();
                let client = match &self.credentials {
                    BigQueryCredentials::ServiceAccountKey(key) => {
                        BigQueryClient::new_with_key(project_id, key.expose_secret()).await?
                    }
                    BigQueryCredentials::ApplicationDefault => {
                        BigQueryClient::new_with_adc(project_id).await?
                    }
                };

                info!(project_id = %self.project_id, "bigquery client created");

                Ok::<_, EtlError>(RwLock::new(client))
            })
            .await
    }
}

impl Destination for BigQueryDestination {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn prepare_table(&self, table_schema: &TableSchema) -> EtlResult<()> {
        let client = self.client().await?.read().await;

        let created = client
            .create_table_if_missing(&self.dataset_id, table_schema)
            .await?;
        if !created {
            info!(table = %table_schema.name, "table already exists in bigquery");
        }

        Ok(())
    }

    async fn delete_rows_by_key(
        &self,
        table_schema: &TableSchema,
        key: ProductKey,
    ) -> EtlResult<()> {
        let client = self.client().await?.read().await;

        client
            .delete_rows_by_key(&self.dataset_id, table_schema, key)
            .await
    }

    async fn append_table_rows(
        &self,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let mut client = self.client().await?.write().await;

        client
            .append_table_rows(&self.dataset_id, table_schema, table_rows)
            .await
    }
}
