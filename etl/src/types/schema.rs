use std::fmt;

/// Name of the key column of the product table.
pub const PRODUCT_KEY_COLUMN: &str = "idproduk";

pub const PRODUCT_NAME_COLUMN: &str = "namaproduk";

pub const PRODUCT_PRICE_COLUMN: &str = "hargaproduk";

pub const PRODUCT_UPDATED_AT_COLUMN: &str = "tanggalupdate";

/// Logical type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int64,
    Float64,
    String,
    /// Civil date and time, carried as `YYYY-MM-DD HH:MM:SS[.ffffff]` text.
    DateTime,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::String => "string",
            ColumnType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
    /// Whether the column is the business key used for reconciliation.
    pub primary: bool,
}

impl ColumnSchema {
    pub fn new(name: &str, typ: ColumnType, nullable: bool, primary: bool) -> Self {
        Self {
            name: name.to_string(),
            typ,
            nullable,
            primary,
        }
    }
}

/// Name and ordered columns of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Schema of the product table the resolved records are reconciled into.
    pub fn product(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_schemas: vec![
                ColumnSchema::new(PRODUCT_KEY_COLUMN, ColumnType::Int64, false, true),
                ColumnSchema::new(PRODUCT_NAME_COLUMN, ColumnType::String, true, false),
                ColumnSchema::new(PRODUCT_PRICE_COLUMN, ColumnType::Float64, true, false),
                ColumnSchema::new(PRODUCT_UPDATED_AT_COLUMN, ColumnType::DateTime, true, false),
            ],
        }
    }

    /// Returns the key column, if the table has exactly one.
    pub fn key_column(&self) -> Option<&ColumnSchema> {
        let mut keys = self.column_schemas.iter().filter(|c| c.primary);
        match (keys.next(), keys.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }
}
