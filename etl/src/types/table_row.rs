use crate::types::Cell;

/// A destination row, with values in the column order of its [`crate::types::TableSchema`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRow {
    values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }
}
