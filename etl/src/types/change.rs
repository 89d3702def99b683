use std::fmt;

use chrono::NaiveDateTime;

/// Business identifier of a product.
pub type ProductKey = i64;

/// Operation tag of a change-log row.
///
/// The capture mechanism records an update as two rows, the image before and the image after
/// the change. Any other tag is kept verbatim so it can be logged, but never reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    UpdateBefore,
    UpdateAfter,
    Other(String),
}

impl ChangeOperation {
    pub const UPDATE_BEFORE_TAG: &'static str = "UPDATE - BEFORE";

    pub const UPDATE_AFTER_TAG: &'static str = "UPDATE - AFTER";

    pub fn as_str(&self) -> &str {
        match self {
            ChangeOperation::UpdateBefore => Self::UPDATE_BEFORE_TAG,
            ChangeOperation::UpdateAfter => Self::UPDATE_AFTER_TAG,
            ChangeOperation::Other(tag) => tag,
        }
    }
}

impl From<&str> for ChangeOperation {
    /// Tags are matched exactly, so `"update - after"` is [`ChangeOperation::Other`].
    fn from(tag: &str) -> Self {
        match tag {
            Self::UPDATE_BEFORE_TAG => ChangeOperation::UpdateBefore,
            Self::UPDATE_AFTER_TAG => ChangeOperation::UpdateAfter,
            other => ChangeOperation::Other(other.to_string()),
        }
    }
}

impl From<String> for ChangeOperation {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            Self::UPDATE_BEFORE_TAG => ChangeOperation::UpdateBefore,
            Self::UPDATE_AFTER_TAG => ChangeOperation::UpdateAfter,
            _ => ChangeOperation::Other(tag),
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business attributes carried by a change-log row besides its key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProductPayload {
    pub name: Option<String>,
    pub price: Option<f64>,
}

/// One row of the source change log.
///
/// Keys repeat across the log; `changed_at` orders the versions of a key. Both are optional
/// because the staging table does not enforce them.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub operation: ChangeOperation,
    pub key: Option<ProductKey>,
    pub payload: ProductPayload,
    pub changed_at: Option<NaiveDateTime>,
}

impl ChangeRecord {
    /// Returns `true` for the after-image of an update, the only rows that are reconciled.
    pub fn is_after_image(&self) -> bool {
        self.operation == ChangeOperation::UpdateAfter
    }
}
