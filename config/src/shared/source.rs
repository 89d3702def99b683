use std::fmt;

use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Procedure invoked to move pending changes into the staging log.
const DEFAULT_CAPTURE_PROCEDURE: &str = "usp_capture_produk_cdc";

/// Table holding the captured change log.
const DEFAULT_STAGING_TABLE: &str = "staging_produk_cdc";

fn default_capture_procedure() -> QualifiedName {
    QualifiedName::unqualified(DEFAULT_CAPTURE_PROCEDURE)
}

fn default_staging_table() -> QualifiedName {
    QualifiedName::unqualified(DEFAULT_STAGING_TABLE)
}

/// Change source configuration.
///
/// This intentionally does not implement [`Serialize`](serde::Serialize) to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub connection: PgConnectionConfig,
    #[serde(default = "default_capture_procedure")]
    pub capture_procedure: QualifiedName,
    #[serde(default = "default_staging_table")]
    pub staging_table: QualifiedName,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()
    }
}

/// A database object name with an optional schema, written `schema.name` or `name`.
///
/// Parsing only checks the shape; quoting is left to the code that renders SQL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    fn unqualified(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_string(),
        }
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = value.split('.').map(str::trim).collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(ValidationError::InvalidFieldValue {
                field: value,
                constraint: "identifier parts must not be empty".to_string(),
            });
        }

        match parts.as_slice() {
            [name] => Ok(Self::unqualified(name)),
            [schema, name] => Ok(Self {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            }),
            _ => Err(ValidationError::InvalidFieldValue {
                field: value,
                constraint: "expected `name` or `schema.name`".to_string(),
            }),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
