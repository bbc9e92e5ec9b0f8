//! Attribute maps and helpers for the JSON values stored in them.

use serde_json::{json, Number, Value};
use std::collections::BTreeMap;

/// Attribute key to value.
pub type Attributes = BTreeMap<String, Value>;

/// Attribute updates where `None` deletes the key.
pub type AttributeUpdate = BTreeMap<String, Option<Value>>;

/// Short name of a value's JSON kind, for error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) if is_pointer(value) => "pointer",
        Value::Object(_) if relation_target(value).is_some() => "relation",
        Value::Object(_) => "object",
    }
}

pub fn is_pointer(value: &Value) -> bool {
    value.get("__type").and_then(Value::as_str) == Some("Pointer")
}

/// Element equality used for set-like array operations.
///
/// Pointers compare by class and object id; everything else by JSON equality.
pub fn same_element(a: &Value, b: &Value) -> bool {
    if is_pointer(a) && is_pointer(b) {
        return a.get("className") == b.get("className") && a.get("objectId") == b.get("objectId");
    }
    a == b
}

pub fn contains(values: &[Value], needle: &Value) -> bool {
    values.iter().any(|v| same_element(v, needle))
}

/// `base` followed by every element of `extra` not already present.
///
/// Duplicates already in `base` are kept.
pub fn union(base: &[Value], extra: &[Value]) -> Vec<Value> {
    let mut out = base.to_vec();
    for value in extra {
        if !contains(&out, value) {
            out.push(value.clone());
        }
    }
    out
}

/// `base` with every occurrence of anything in `remove` dropped.
pub fn difference(base: &[Value], remove: &[Value]) -> Vec<Value> {
    base.iter()
        .filter(|v| !contains(remove, v))
        .cloned()
        .collect()
}

/// Add two JSON numbers, staying integral while both sides are.
///
/// Returns `None` if the float result is not finite.
pub fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Some(Number::from(sum));
        }
    }
    Number::from_f64(a.as_f64()? + b.as_f64()?)
}

/// Relation descriptor value for a target class.
pub fn relation_value(target_class: &str) -> Value {
    json!({ "__type": "Relation", "className": target_class })
}

/// Target class of a relation descriptor, if `value` is one.
pub fn relation_target(value: &Value) -> Option<&str> {
    if value.get("__type").and_then(Value::as_str) != Some("Relation") {
        return None;
    }
    value.get("className").and_then(Value::as_str)
}
