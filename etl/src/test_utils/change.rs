use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{ChangeOperation, ChangeRecord, ProductKey, ProductPayload, ResolvedRecord};

/// Returns midnight of the given day of 2024.
pub fn day(month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap()
}

/// Returns a time on 2024-01-01, `seconds` after midnight.
pub fn second(seconds: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(seconds / 3600, (seconds / 60) % 60, seconds % 60))
        .unwrap()
}

/// Builds a change-log row with every field present.
pub fn change(
    operation: ChangeOperation,
    key: ProductKey,
    changed_at: NaiveDateTime,
    name: &str,
    price: f64,
) -> ChangeRecord {
    ChangeRecord {
        operation,
        key: Some(key),
        payload: ProductPayload {
            name: Some(name.to_string()),
            price: Some(price),
        },
        changed_at: Some(changed_at),
    }
}

/// Builds the after-image of an update.
pub fn after_image(
    key: ProductKey,
    changed_at: NaiveDateTime,
    name: &str,
    price: f64,
) -> ChangeRecord {
    change(ChangeOperation::UpdateAfter, key, changed_at, name, price)
}

/// Builds the before-image of an update.
pub fn before_image(
    key: ProductKey,
    changed_at: NaiveDateTime,
    name: &str,
    price: f64,
) -> ChangeRecord {
    change(ChangeOperation::UpdateBefore, key, changed_at, name, price)
}

/// Builds a resolved record.
pub fn resolved(
    key: ProductKey,
    changed_at: NaiveDateTime,
    name: &str,
    price: f64,
) -> ResolvedRecord {
    ResolvedRecord::new(
        key,
        ProductPayload {
            name: Some(name.to_string()),
            price: Some(price),
        },
        &changed_at,
    )
}
