//! Idempotence filter
//!
//! Writing results back changes the VM's metadata, which the server reports
//! as a new event and which the next poll would compute again. Comparing
//! the proposed document with the stored one structurally keeps repeated
//! polls from producing repeated writes.

use serde_json::{Map, Value};

use super::{BACKUP_RESULTS_KEY, METADATA_KEY, RESULTS_KEY, ResultBatch};

/// Stored and proposed metadata of one VM
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    /// Metadata object as stored
    pub current: Value,
    /// Metadata object with fresh results
    pub proposed: Value,
}

impl RemoteState {
    /// Compute the proposed state for a fetched metadata document
    ///
    /// Returns `None` when the document carries no metadata section at all.
    pub fn from_document(document: &Value, batch: &ResultBatch) -> Option<Self> {
        let section = document.get(METADATA_KEY).filter(|v| !v.is_null())?;
        let current = section
            .get(METADATA_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let proposed = merge_results(&current, batch);
        Some(Self {
            current: Value::Object(current),
            proposed: Value::Object(proposed),
        })
    }

    /// Whether writing `proposed` would change nothing
    pub fn is_noop(&self) -> bool {
        structurally_equal(&self.current, &self.proposed)
    }

    /// Document to write back: `document` with its metadata replaced
    pub fn write_body(&self, document: &Value) -> Value {
        let mut body = match document {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        body.insert(
            METADATA_KEY.to_string(),
            single(METADATA_KEY, self.proposed.clone()),
        );
        Value::Object(body)
    }
}

/// `original` with its results section replaced by `batch`
///
/// Every other key is kept as is.
pub fn merge_results(original: &Map<String, Value>, batch: &ResultBatch) -> Map<String, Value> {
    let mut merged = original.clone();
    merged.insert(
        BACKUP_RESULTS_KEY.to_string(),
        single(RESULTS_KEY, Value::Array(batch.to_results())),
    );
    merged
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Deep equality that ignores object key order
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| structurally_equal(value, other)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| structurally_equal(x, y))
        }
        _ => a == b,
    }
}
