use std::future::Future;

use crate::error::EtlResult;
use crate::types::{ProductKey, TableRow, TableSchema};

/// Trait for key-value tables that resolved records are reconciled into.
///
/// The table is not expected to offer an upsert primitive nor to enforce key uniqueness. Both
/// data operations must be idempotent with respect to a retry of the same reconciliation:
/// deleting an absent key is not an error.
///
/// Reconciliations of distinct keys may run concurrently against the same destination, so
/// implementations must accept concurrent calls.
///
/// The trait also provides an optional [`Destination::shutdown`] method with a default no-op
/// implementation. Override this method if your destination requires cleanup when the batch
/// ends.
pub trait Destination {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Releases the resources held by the destination.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }

    /// Creates the table if it does not exist.
    ///
    /// Existing tables are left untouched, rows included.
    fn prepare_table(
        &self,
        table_schema: &TableSchema,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Deletes every row whose key column equals `key`.
    ///
    /// The key value must be bound as a parameter, never interpolated into a statement.
    fn delete_rows_by_key(
        &self,
        table_schema: &TableSchema,
        key: ProductKey,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Appends rows to the table without touching existing ones.
    fn append_table_rows(
        &self,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> impl Future<Output = EtlResult<()>> + Send;
}
