//! Reduction of a change log to the latest state of each product.
//!
//! Only after-images of updates are kept. Among the after-images of a key, the one with the
//! latest change timestamp wins; when several share that timestamp, the one appearing last in
//! the log wins. The output holds one record per key, ordered by key.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use config::shared::MalformedRecordPolicy;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{ChangeRecord, ProductKey, ProductPayload, ResolvedRecord};

/// Latest after-image seen so far for a key.
struct Candidate {
    changed_at: NaiveDateTime,
    payload: ProductPayload,
}

/// Collapses a change log into one [`ResolvedRecord`] per key.
///
/// After-images missing their key or timestamp are handled according to `policy`: skipped
/// with a warning, or failing the whole reduction with [`ErrorKind::InvalidData`]. Rows of any
/// other operation are dropped before validation.
pub fn reduce(
    records: Vec<ChangeRecord>,
    policy: MalformedRecordPolicy,
) -> EtlResult<Vec<ResolvedRecord>> {
    let total = records.len();
    let mut latest: BTreeMap<ProductKey, Candidate> = BTreeMap::new();
    let mut filtered = 0usize;
    let mut skipped = 0usize;

    for (position, record) in records.into_iter().enumerate() {
        if !record.is_after_image() {
            filtered += 1;
            continue;
        }

        let (key, changed_at) = match (record.key, record.changed_at) {
            (Some(key), Some(changed_at)) => (key, changed_at),
            (key, changed_at) => {
                let missing = match (key, changed_at) {
                    (None, None) => "key and change timestamp",
                    (None, Some(_)) => "key",
                    _ => "change timestamp",
                };

                match policy {
                    MalformedRecordPolicy::Skip => {
                        warn!(position, ?key, missing, "skipping malformed change record");
                        skipped += 1;
                        continue;
                    }
                    MalformedRecordPolicy::Fail => {
                        bail!(
                            ErrorKind::InvalidData,
                            "Malformed change record",
                            format!("The change record at position {position} has no {missing}")
                        );
                    }
                }
            }
        };

        // `>=` lets a later record with the same timestamp replace an earlier one.
        match latest.get_mut(&key) {
            Some(candidate) if changed_at >= candidate.changed_at => {
                candidate.changed_at = changed_at;
                candidate.payload = record.payload;
            }
            Some(_) => {}
            None => {
                latest.insert(
                    key,
                    Candidate {
                        changed_at,
                        payload: record.payload,
                    },
                );
            }
        }
    }

    debug!(
        total,
        filtered,
        skipped,
        resolved = latest.len(),
        "change log reduced"
    );

    Ok(latest
        .into_iter()
        .map(|(key, candidate)| ResolvedRecord::new(key, candidate.payload, &candidate.changed_at))
        .collect())
}
