//! Estimated attributes.
//!
//! The value a caller should observe for a key is the server value with every
//! queued operation applied on top: in-flight sets first, then pending sets,
//! each oldest first. The result depends only on the record as it is now.

use crate::record::StateRecord;
use serde_json::Value;
use shelf_core::Attributes;
use tracing::warn;

/// Estimate one attribute. `None` means the attribute is absent.
pub fn estimate_attribute(record: &StateRecord, key: &str) -> Option<Value> {
    let mut value = record.server_data().get(key).cloned();
    for op in record.operations_for(key) {
        match op.apply(value.as_ref()) {
            Ok(next) => value = next,
            // Only reachable when the server changed the value's type under a
            // queued operation; the operation is skipped, not the whole key.
            Err(err) => warn!(
                identity = %record.identity(),
                key = %key,
                op = op.kind(),
                error = %err,
                "skipping operation in estimate"
            ),
        }
    }
    value
}

/// Estimate every known attribute, leaving out the absent ones.
pub fn estimate_attributes(record: &StateRecord) -> Attributes {
    record
        .known_keys()
        .into_iter()
        .filter_map(|key| estimate_attribute(record, key).map(|value| (key.to_string(), value)))
        .collect()
}
