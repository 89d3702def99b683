use std::fmt;

use futures::StreamExt;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::google::cloud::bigquery::storage::v1::{
    AppendRowsResponse, RowError, append_rows_response,
};
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::{
    Client,
    error::BQError,
    model::{
        query_parameter::QueryParameter, query_parameter_type::QueryParameterType,
        query_parameter_value::QueryParameterValue, query_request::QueryRequest,
        query_response::ResultSet,
    },
    storage::{
        ColumnMode, ColumnType as StorageColumnType, FieldDescriptor, StorageApi, StreamName,
        TableDescriptor,
    },
};
use tonic::Code;
use tracing::{debug, info};

use crate::destination::bigquery::encoding::BigQueryTableRow;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::{bail, etl_error};
use crate::types::{ColumnSchema, ColumnType, ProductKey, TableRow, TableSchema};

/// Maximum number of bytes sent in one append request.
const MAX_SIZE_BYTES: usize = 9 * 1024 * 1024;

/// Trace identifier attached to storage write requests.
const ETL_TRACE_ID: &str = "CDC Syncer BigQueryClient";

/// Name of the query parameter bound to the key of a delete.
const KEY_PARAMETER: &str = "key";

/// Returns `true` for gRPC codes that denote a transient condition of the service.
fn is_transient_code(code: Code) -> bool {
    match code {
        Code::Unavailable
        | Code::Internal
        | Code::Aborted
        | Code::Cancelled
        | Code::DeadlineExceeded
        | Code::ResourceExhausted => true,
        _ => false,
    }
}

/// Converts BigQuery errors to sync errors.
///
/// Transient failures (throttling, overload, dropped connections) map to retryable kinds, the
/// rest to kinds that require fixing credentials, permissions or data first.
fn bq_error_to_etl_error(err: BQError) -> EtlError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::AuthError(_) | BQError::YupAuthError(_) | BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),

        BQError::RequestError(_) => (ErrorKind::DestinationIoError, "BigQuery request failed"),
        BQError::TonicTransportError(_) => {
            (ErrorKind::DestinationIoError, "BigQuery transport error")
        }

        BQError::ResponseError { error } => match error.error.code {
            401 => (
                ErrorKind::AuthenticationError,
                "BigQuery authentication failed",
            ),
            403 if error.error.message.to_lowercase().contains("exceeded") => (
                ErrorKind::DestinationUnavailable,
                "BigQuery rate limit exceeded",
            ),
            403 => (ErrorKind::PermissionDenied, "BigQuery permission denied"),
            404 => (
                ErrorKind::DestinationTableMissing,
                "BigQuery entity not found",
            ),
            400 => (ErrorKind::InvalidData, "BigQuery rejected the request"),
            429 | 500..=599 => (ErrorKind::DestinationUnavailable, "BigQuery unavailable"),
            _ => (ErrorKind::DestinationQueryFailed, "BigQuery response error"),
        },

        BQError::TonicStatusError(status) => match status.code() {
            code if is_transient_code(code) => {
                (ErrorKind::DestinationUnavailable, "BigQuery unavailable")
            }
            Code::Unknown => {
                let message = status.message().to_lowercase();
                if message.contains("transport") || message.contains("connection") {
                    (ErrorKind::DestinationIoError, "BigQuery transport error")
                } else {
                    (ErrorKind::DestinationError, "BigQuery unknown error")
                }
            }
            Code::PermissionDenied => (ErrorKind::PermissionDenied, "BigQuery permission denied"),
            Code::Unauthenticated => (
                ErrorKind::AuthenticationError,
                "BigQuery authentication failed",
            ),
            Code::InvalidArgument => (ErrorKind::InvalidData, "BigQuery invalid argument"),
            Code::NotFound => (
                ErrorKind::DestinationTableMissing,
                "BigQuery entity not found",
            ),
            _ => (ErrorKind::DestinationError, "BigQuery storage write failed"),
        },

        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        BQError::InvalidColumnType { .. } => {
            (ErrorKind::ConversionError, "BigQuery column type mismatch")
        }

        _ => (ErrorKind::DestinationError, "BigQuery error"),
    };

    etl_error!(kind, description, err.to_string())
}

/// A client for the BigQuery tables the sync writes to.
///
/// DDL and DML go through the jobs API, rows are appended through the default stream of the
/// Storage Write API.
pub struct BigQueryClient {
    project_id: String,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key JSON string.
    pub async fn new_with_key(project_id: String, sa_key: &str) -> EtlResult<BigQueryClient> {
        let sa_key = parse_service_account_key(sa_key).map_err(|err| {
            etl_error!(
                ErrorKind::AuthenticationError,
                "Invalid BigQuery service account key",
                err.to_string(),
                source: err
            )
        })?;

        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(bq_error_to_etl_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] using Application Default Credentials.
    pub async fn new_with_adc(project_id: String) -> EtlResult<BigQueryClient> {
        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await
            .map_err(bq_error_to_etl_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Returns the fully qualified, quoted name of a table.
    pub fn full_table_name(&self, dataset_id: &str, table_id: &str) -> EtlResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(table_id, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    /// Creates the table if it does not exist.
    ///
    /// Returns `true` if the table was created.
    pub async fn create_table_if_missing(
        &self,
        dataset_id: &str,
        table_schema: &TableSchema,
    ) -> EtlResult<bool> {
        if self.table_exists(dataset_id, &table_schema.name).await? {
            return Ok(false);
        }

        let full_table_name = self.full_table_name(dataset_id, &table_schema.name)?;
        let columns_spec = create_columns_spec(&table_schema.column_schemas)?;
        let query = format!("create table if not exists {full_table_name} {columns_spec}");

        info!(%full_table_name, "creating table in bigquery");
        let _ = self.query(QueryRequest::new(query)).await?;

        Ok(true)
    }

    /// Checks if a table exists in the dataset.
    pub async fn table_exists(&self, dataset_id: &str, table_id: &str) -> EtlResult<bool> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
        let query = format!(
            "select exists (select 1 from `{project_id}.{dataset}.INFORMATION_SCHEMA.TABLES` \
             where table_name = @table_name) as table_exists"
        );

        let mut request = QueryRequest::new(query);
        request.query_parameters = Some(vec![query_parameter("table_name", "STRING", table_id)]);

        let mut result_set = self.query(request).await?;

        let mut exists = false;
        if result_set.next_row() {
            exists = result_set
                .get_bool_by_name("table_exists")
                .map_err(bq_error_to_etl_error)?
                .unwrap_or(false);
        }

        Ok(exists)
    }

    /// Deletes the rows of a key with a parameterized DML statement.
    pub async fn delete_rows_by_key(
        &self,
        dataset_id: &str,
        table_schema: &TableSchema,
        key: ProductKey,
    ) -> EtlResult<()> {
        let full_table_name = self.full_table_name(dataset_id, &table_schema.name)?;
        let key_column = key_column_name(table_schema)?;

        let query =
            format!("delete from {full_table_name} where `{key_column}` = @{KEY_PARAMETER}");
        let mut request = QueryRequest::new(query);
        request.query_parameters = Some(vec![query_parameter(
            KEY_PARAMETER,
            "INT64",
            &key.to_string(),
        )]);

        let _ = self.query(request).await?;
        debug!(%full_table_name, key, "deleted rows by key");

        Ok(())
    }

    /// Appends rows through the default stream of the Storage Write API.
    ///
    /// Rows are split into requests of at most [`MAX_SIZE_BYTES`].
    pub async fn append_table_rows(
        &mut self,
        dataset_id: &str,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let table_descriptor = Self::table_descriptor(table_schema);
        let default_stream = StreamName::new_default(
            self.project_id.clone(),
            dataset_id.to_string(),
            table_schema.name.clone(),
        );

        let encoded_rows: Vec<BigQueryTableRow> =
            table_rows.into_iter().map(BigQueryTableRow).collect();
        let mut pending = encoded_rows.as_slice();

        while !pending.is_empty() {
            let (rows, num_processed_rows) =
                StorageApi::create_rows(&table_descriptor, pending, MAX_SIZE_BYTES);

            let mut response_stream = self
                .client
                .storage_mut()
                .append_rows(&default_stream, rows, ETL_TRACE_ID.to_owned())
                .await
                .map_err(bq_error_to_etl_error)?;

            while let Some(response) = response_stream.next().await {
                let response = response
                    .map_err(|status| bq_error_to_etl_error(BQError::TonicStatusError(status)))?;
                check_append_response(response)?;
            }

            pending = &pending[num_processed_rows..];
        }

        Ok(())
    }

    /// Executes an SQL query and returns the result set.
    async fn query(&self, request: QueryRequest) -> EtlResult<ResultSet> {
        let query_response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(bq_error_to_etl_error)?;

        Ok(ResultSet::new_from_query_response(query_response))
    }

    /// Converts a [`TableSchema`] to the [`TableDescriptor`] used by the Storage Write API.
    ///
    /// Date-time columns travel as strings, which BigQuery parses into `datetime` values.
    pub fn table_descriptor(table_schema: &TableSchema) -> TableDescriptor {
        let field_descriptors = (1..)
            .zip(&table_schema.column_schemas)
            .map(|(number, column_schema)| {
                let typ = match column_schema.typ {
                    ColumnType::Int64 => StorageColumnType::Int64,
                    ColumnType::Float64 => StorageColumnType::Double,
                    ColumnType::String | ColumnType::DateTime => StorageColumnType::String,
                };

                let mode = if column_schema.nullable {
                    ColumnMode::Nullable
                } else {
                    ColumnMode::Required
                };

                FieldDescriptor {
                    number,
                    name: column_schema.name.clone(),
                    typ,
                    mode,
                }
            })
            .collect();

        TableDescriptor { field_descriptors }
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

fn query_parameter(name: &str, typ: &str, value: &str) -> QueryParameter {
    QueryParameter {
        name: Some(name.to_string()),
        parameter_type: Some(QueryParameterType {
            r#type: typ.to_string(),
            array_type: None,
            struct_types: None,
        }),
        parameter_value: Some(QueryParameterValue {
            value: Some(value.to_string()),
            array_values: None,
            struct_values: None,
        }),
    }
}

/// Escapes an identifier so it can be wrapped in backticks.
///
/// Empty identifiers and identifiers with control characters are rejected.
fn sanitize_identifier(identifier: &str, context: &str) -> EtlResult<String> {
    if identifier.is_empty() {
        return Err(etl_error!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        ));
    }

    if identifier.chars().any(char::is_control) {
        return Err(etl_error!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        ));
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

fn key_column_name(table_schema: &TableSchema) -> EtlResult<String> {
    let Some(key_column) = table_schema.key_column() else {
        return Err(etl_error!(
            ErrorKind::InvalidState,
            "Table has no single key column",
            format!("The table '{}' must have exactly one key column", table_schema.name)
        ));
    };

    sanitize_identifier(&key_column.name, "BigQuery key column")
}

fn bigquery_type(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Int64 => "int64",
        ColumnType::Float64 => "float64",
        ColumnType::String => "string",
        ColumnType::DateTime => "datetime",
    }
}

fn column_spec(column_schema: &ColumnSchema) -> EtlResult<String> {
    let column_name = sanitize_identifier(&column_schema.name, "BigQuery column name")?;

    let mut column_spec = format!("`{}` {}", column_name, bigquery_type(column_schema.typ));
    if !column_schema.nullable {
        column_spec.push_str(" not null");
    }

    Ok(column_spec)
}

/// Builds the column list of a `create table` statement.
///
/// Key columns are declared as a primary key that is not enforced: BigQuery only accepts
/// unenforced constraints, and uniqueness is maintained by reconciliation.
fn create_columns_spec(column_schemas: &[ColumnSchema]) -> EtlResult<String> {
    let mut spec = column_schemas
        .iter()
        .map(column_spec)
        .collect::<EtlResult<Vec<_>>>()?
        .join(",");

    let key_columns = column_schemas
        .iter()
        .filter(|c| c.primary)
        .map(|c| {
            sanitize_identifier(&c.name, "BigQuery key column").map(|name| format!("`{name}`"))
        })
        .collect::<EtlResult<Vec<_>>>()?;

    if !key_columns.is_empty() {
        spec.push_str(&format!(", primary key ({}) not enforced", key_columns.join(",")));
    }

    Ok(format!("({spec})"))
}

/// Fails when BigQuery rejected the append inside an otherwise successful response.
///
/// Rejected rows are not written. Response errors and row errors are both permanent.
fn check_append_response(response: AppendRowsResponse) -> EtlResult<()> {
    if let Some(append_rows_response::Response::Error(status)) = &response.response {
        bail!(
            ErrorKind::InvalidData,
            "BigQuery rejected the append",
            format!("status code {}: {}", status.code, status.message)
        );
    }

    if !response.row_errors.is_empty() {
        let errors: Vec<EtlError> = response
            .row_errors
            .into_iter()
            .map(row_error_to_etl_error)
            .collect();

        return Err(errors.into());
    }

    Ok(())
}

fn row_error_to_etl_error(err: RowError) -> EtlError {
    etl_error!(
        ErrorKind::InvalidData,
        "BigQuery row error",
        format!("row {} rejected: {}", err.index, err.message)
    )
}
