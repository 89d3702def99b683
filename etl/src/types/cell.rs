/// A single typed value of a destination row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Null,
    I64(i64),
    F64(f64),
    String(String),
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::String).unwrap_or(Cell::Null)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Cell::F64).unwrap_or(Cell::Null)
    }
}
