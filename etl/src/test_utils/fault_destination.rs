use std::sync::Arc;

use tokio::sync::Mutex;

use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{Cell, ProductKey, TableRow, TableSchema};

/// Destination operation a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOperation {
    PrepareTable,
    DeleteRowsByKey,
    AppendTableRows,
}

#[derive(Debug)]
struct Fault {
    operation: FaultOperation,
    /// Only calls touching this key fail, any call when [`None`].
    key: Option<ProductKey>,
    /// Failures left, unbounded when [`None`].
    remaining: Option<usize>,
    kind: ErrorKind,
}

#[derive(Debug, Default)]
struct Inner {
    faults: Vec<Fault>,
    calls: Vec<(FaultOperation, Option<ProductKey>)>,
}

impl Inner {
    fn take_fault(
        &mut self,
        operation: FaultOperation,
        keys: &[ProductKey],
    ) -> Option<ErrorKind> {
        let fault = self.faults.iter_mut().find(|fault| {
            fault.operation == operation
                && fault.remaining != Some(0)
                && fault.key.is_none_or(|key| keys.contains(&key))
        })?;

        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }

        Some(fault.kind)
    }
}

/// Wraps a destination to make chosen operations fail and to count calls.
///
/// Faults are checked before the call reaches the wrapped destination, so a failed call has no
/// effect on it.
#[derive(Debug, Clone)]
pub struct FaultInjectingDestination<D> {
    wrapped_destination: D,
    inner: Arc<Mutex<Inner>>,
}

impl<D> FaultInjectingDestination<D> {
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped_destination: destination,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn wrapped(&self) -> &D {
        &self.wrapped_destination
    }

    /// Makes the next `times` calls of `operation` fail with `kind`.
    pub async fn fail_times(&self, operation: FaultOperation, times: usize, kind: ErrorKind) {
        self.add_fault(operation, None, Some(times), kind).await;
    }

    /// Makes every call of `operation` touching `key` fail with `kind`.
    pub async fn fail_key(&self, operation: FaultOperation, key: ProductKey, kind: ErrorKind) {
        self.add_fault(operation, Some(key), None, kind).await;
    }

    async fn add_fault(
        &self,
        operation: FaultOperation,
        key: Option<ProductKey>,
        remaining: Option<usize>,
        kind: ErrorKind,
    ) {
        let mut inner = self.inner.lock().await;
        inner.faults.push(Fault {
            operation,
            key,
            remaining,
            kind,
        });
    }

    /// Returns how many calls of `operation` were received, failed ones included.
    pub async fn calls(&self, operation: FaultOperation) -> usize {
        let inner = self.inner.lock().await;
        inner.calls.iter().filter(|(op, _)| *op == operation).count()
    }

    async fn check(&self, operation: FaultOperation, keys: &[ProductKey]) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        for key in keys {
            inner.calls.push((operation, Some(*key)));
        }
        if keys.is_empty() {
            inner.calls.push((operation, None));
        }

        match inner.take_fault(operation, keys) {
            Some(kind) => Err(etl_error!(
                kind,
                "Injected destination failure",
                format!("{operation:?} failed for keys {keys:?}")
            )),
            None => Ok(()),
        }
    }
}

fn row_keys(table_schema: &TableSchema, table_rows: &[TableRow]) -> Vec<ProductKey> {
    let Some(index) = table_schema.column_schemas.iter().position(|c| c.primary) else {
        return Vec::new();
    };

    table_rows
        .iter()
        .filter_map(|row| match row.values().get(index) {
            Some(Cell::I64(key)) => Some(*key),
            _ => None,
        })
        .collect()
}

impl<D> Destination for FaultInjectingDestination<D>
where
    D: Destination + Send + Sync,
{
    fn name() -> &'static str {
        D::name()
    }

    async fn shutdown(&self) -> EtlResult<()> {
        self.wrapped_destination.shutdown().await
    }

    async fn prepare_table(&self, table_schema: &TableSchema) -> EtlResult<()> {
        self.check(FaultOperation::PrepareTable, &[]).await?;
        self.wrapped_destination.prepare_table(table_schema).await
    }

    async fn delete_rows_by_key(
        &self,
        table_schema: &TableSchema,
        key: ProductKey,
    ) -> EtlResult<()> {
        self.check(FaultOperation::DeleteRowsByKey, &[key]).await?;
        self.wrapped_destination
            .delete_rows_by_key(table_schema, key)
            .await
    }

    async fn append_table_rows(
        &self,
        table_schema: &TableSchema,
        table_rows: Vec<TableRow>,
    ) -> EtlResult<()> {
        let keys = row_keys(table_schema, &table_rows);
        self.check(FaultOperation::AppendTableRows, &keys).await?;
        self.wrapped_destination
            .append_table_rows(table_schema, table_rows)
            .await
    }
}
