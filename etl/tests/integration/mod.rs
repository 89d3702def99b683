#[cfg(feature = "bigquery")]
mod bigquery_destination_test;
mod pipeline_test;
mod postgres_source_test;
