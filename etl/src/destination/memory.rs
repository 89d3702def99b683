use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, ProductKey, TableRow, TableSchema};

/// An operation received by a [`MemoryDestination`], in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationOperation {
    PrepareTable { table: String },
    DeleteRowsByKey { table: String, key: ProductKey },
    AppendTableRows { table: String, rows: Vec<TableRow> },
}

#[derive(Debug, Default)]
struct Inner {
    operations: Vec<DestinationOperation>,
    tables: HashMap<String, Vec<TableRow>>,
}

/// In-memory destination for tests and dry runs.
///
/// Tables behave like an analytical store without key constraints: appending a row whose key
/// already exists creates a duplicate. Deleting from or appending to a table that was never
/// prepared fails, as it would against a real store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every operation received so far.
    pub async fn operations(&self) -> Vec<DestinationOperation> {
        let inner = self.inner.lock().await;
        inner.operations.clone()
    }

    /// Returns the rows of a table, or [`None`] if it was never prepared.
    pub async fn table_rows(&self, table: &str) -> Option<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned()
    }

    /// Seeds a table with rows, e.g. to simulate a previous run.
    pub async fn insert_table_rows(&self, table: &str, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }
}

fn key_index(table_schema: &TableSchema) -> EtlResult<usize> {
    match table_schema.column_schemas.iter().position(|c| c.primary) {
        Some(index) => Ok(index),
        None => bail!(
            ErrorKind::InvalidState,
            "Table has no key column",
            format!("The table '{}' has no key column", table_schema.name)
        ),
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn prepare_table(&self, table_schema: &TableSchema) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        let table = table_schema.name.clone();
        if !inner.tables.contains_key(&table) {
            info!(%table, "creating table");
            inner.tables.insert(table.clone(), Vec::new());
        }
        inner
            .operations
            .push(DestinationOperation::PrepareTable { table });

        Ok(())
    }

    async fn delete_rows_by_key(
        &self,
        table_schema: &TableSchema,
        key: ProductKey,
    ) -> EtlResult<()> {
        let key_index = key_index(table_schema)?;
        let mut inner = self.inner.lock().await;

        let table = table_schema.name.clone();
        let Some(rows) = inner.tables.get_mut(&table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table not found",
                format!("The table '{table}' does not exist")
            );
        };

        let before = rows.len();
        rows.retain(|row| row.values().get(key_index) != Some(&Cell::I64(key)));
        info!(%table, key, deleted = before - rows.len(), "deleted rows by key");

        inner
            .operations
            .push(DestinationOperation::DeleteRowsByKey { table, key });

        Ok(())
    }

    async fn append_table_rows(
        &self,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        let table = table_schema.name.clone();
        let Some(rows) = inner.tables.get_mut(&table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table not found",
                format!("The table '{table}' does not exist")
            );
        };

        info!(%table, "appending a batch of {} table rows", table_rows.len());
        rows.extend(table_rows.iter().cloned());

        inner.operations.push(DestinationOperation::AppendTableRows {
            table,
            rows: table_rows,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: i64, price: f64) -> TableRow {
        TableRow::new(vec![
            Cell::I64(key),
            Cell::String("A".to_string()),
            Cell::F64(price),
            Cell::String("2024-01-01 00:00:00".to_string()),
        ])
    }

    #[tokio::test]
    async fn delete_only_removes_rows_of_the_key() {
        let destination = MemoryDestination::new();
        let schema = TableSchema::product("produk");
        destination.prepare_table(&schema).await.unwrap();
        destination
            .insert_table_rows("produk", vec![row(1, 1.0), row(2, 2.0), row(1, 3.0)])
            .await;

        destination.delete_rows_by_key(&schema, 1).await.unwrap();

        assert_eq!(destination.table_rows("produk").await, Some(vec![row(2, 2.0)]));
    }

    #[tokio::test]
    async fn deleting_an_absent_key_succeeds() {
        let destination = MemoryDestination::new();
        let schema = TableSchema::product("produk");
        destination.prepare_table(&schema).await.unwrap();

        destination.delete_rows_by_key(&schema, 42).await.unwrap();

        assert_eq!(destination.table_rows("produk").await, Some(vec![]));
    }

    #[tokio::test]
    async fn preparing_keeps_existing_rows() {
        let destination = MemoryDestination::new();
        let schema = TableSchema::product("produk");
        destination.insert_table_rows("produk", vec![row(1, 1.0)]).await;

        destination.prepare_table(&schema).await.unwrap();

        assert_eq!(destination.table_rows("produk").await, Some(vec![row(1, 1.0)]));
    }

    #[tokio::test]
    async fn writes_to_unprepared_tables_fail() {
        let destination = MemoryDestination::new();
        let schema = TableSchema::product("produk");

        let err = destination
            .append_table_rows(&schema, vec![row(1, 1.0)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);

        let err = destination.delete_rows_by_key(&schema, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);
        assert!(destination.operations().await.is_empty());
    }
}
