//! Snapshot diffing
//!
//! Compares two JSON snapshots of the same entity and reports the top-level
//! fields whose values differ. Nested differences are reported at the parent
//! key. An explicit `null` and an absent key are treated as the same value,
//! and numbers compare by value (`1 == 1.0`).
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use rams_server::audit::diff::diff_snapshots;
//!
//! let changes = diff_snapshots(&json!({"title": "A", "budget": 10}), &json!({"title": "B", "budget": 10}));
//! assert_eq!(changes.fields, vec!["title"]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

/// Field-level differences between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Previous values of the changed fields (`null` when the field was absent)
    pub before: Map<String, JsonValue>,
    /// New values of the changed fields (`null` when the field was removed)
    pub after: Map<String, JsonValue>,
    /// Changed top-level keys in lexicographic order
    pub fields: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Diff two snapshots.
///
/// Non-object snapshots are compared as `{"value": <snapshot>}`.
pub fn diff_snapshots(before: &JsonValue, after: &JsonValue) -> ChangeSet {
    let before = as_object(before);
    let after = as_object(after);

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut changes = ChangeSet::default();

    for key in keys {
        let old = before.get(key).unwrap_or(&JsonValue::Null);
        let new = after.get(key).unwrap_or(&JsonValue::Null);
        if !deep_eq(old, new) {
            changes.before.insert(key.clone(), old.clone());
            changes.after.insert(key.clone(), new.clone());
            changes.fields.push(key.clone());
        }
    }

    changes
}

/// Diff two optional snapshots, returning `None` when nothing changed.
///
/// A missing side counts as the empty object, so creations diff against `{}`
/// and deletions report every field going away.
pub fn compute_changes(before: Option<&JsonValue>, after: Option<&JsonValue>) -> Option<ChangeSet> {
    let empty = JsonValue::Object(Map::new());
    let changes = diff_snapshots(before.unwrap_or(&empty), after.unwrap_or(&empty));
    (!changes.is_empty()).then_some(changes)
}

/// Structural equality with `null` ≡ absent and numeric value comparison
pub fn deep_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => true,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x == y,
        (JsonValue::String(x), JsonValue::String(y)) => x == y,
        (JsonValue::Number(x), JsonValue::Number(y)) => numbers_eq(x, y),
        (JsonValue::Array(xs), JsonValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_eq(x, y))
        },
        (JsonValue::Object(xs), JsonValue::Object(ys)) => {
            let keys: BTreeSet<&String> = xs.keys().chain(ys.keys()).collect();
            keys.into_iter().all(|key| {
                deep_eq(
                    xs.get(key).unwrap_or(&JsonValue::Null),
                    ys.get(key).unwrap_or(&JsonValue::Null),
                )
            })
        },
        _ => false,
    }
}

fn numbers_eq(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn as_object(value: &JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map.clone(),
        JsonValue::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        },
    }
}
