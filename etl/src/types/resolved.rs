use chrono::{NaiveDateTime, Timelike};

use crate::types::{Cell, ProductKey, ProductPayload, TableRow};

/// Layout of a timestamp without sub-second part.
const WHOLE_SECONDS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of a timestamp with a sub-second part, at microsecond precision.
const FRACTIONAL_SECONDS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Latest known state of one product in a batch.
///
/// A batch holds at most one resolved record per key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub key: ProductKey,
    pub name: Option<String>,
    pub price: Option<f64>,
    /// Change timestamp in the textual form written to the destination.
    pub last_updated: String,
}

impl ResolvedRecord {
    pub fn new(key: ProductKey, payload: ProductPayload, changed_at: &NaiveDateTime) -> Self {
        Self {
            key,
            name: payload.name,
            price: payload.price,
            last_updated: format_timestamp(changed_at),
        }
    }

    /// Projects the record onto the product table columns, in schema order.
    pub fn into_table_row(self) -> TableRow {
        TableRow::new(vec![
            Cell::I64(self.key),
            self.name.into(),
            self.price.into(),
            Cell::String(self.last_updated),
        ])
    }
}

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS`, followed by `.ffffff` when the sub-second part
/// is not zero.
pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    let format = if timestamp.nanosecond() == 0 {
        WHOLE_SECONDS_FORMAT
    } else {
        FRACTIONAL_SECONDS_FORMAT
    };

    timestamp.format(format).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micro)
            .unwrap()
    }

    #[test]
    fn whole_seconds_have_no_fraction() {
        assert_eq!(format_timestamp(&at(10, 0, 0, 0)), "2024-01-01 10:00:00");
    }

    #[test]
    fn fractions_are_rendered_in_microseconds() {
        assert_eq!(
            format_timestamp(&at(10, 0, 0, 500_000)),
            "2024-01-01 10:00:00.500000"
        );
    }

    #[test]
    fn table_row_follows_schema_order() {
        let record = ResolvedRecord::new(
            5,
            ProductPayload {
                name: Some("Kopi".to_string()),
                price: None,
            },
            &at(11, 0, 0, 0),
        );

        assert_eq!(
            record.into_table_row().into_values(),
            vec![
                Cell::I64(5),
                Cell::String("Kopi".to_string()),
                Cell::Null,
                Cell::String("2024-01-01 11:00:00".to_string()),
            ]
        );
    }
}
