//! Value utility functions shared across modules
//!
//! Nested field access with dot notation, value comparison for filters and
//! sorting, and the canonical JSON form used for query fingerprints.

use serde_json::Value;
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// ```
/// use serde_json::json;
/// use vellum_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return step(doc, path);
    }

    let mut value = doc;
    for part in path.split('.') {
        value = step(value, part)?;
    }
    Some(value)
}

fn step<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    }
}

/// Set a value at a nested path, creating intermediate objects
///
/// ```
/// use serde_json::json;
/// use vellum_core::value_utils::set_nested_value;
///
/// let mut doc = json!({"name": "Alice"});
/// set_nested_value(&mut doc, "address.city", json!("NYC"));
/// assert_eq!(doc["address"]["city"], "NYC");
/// ```
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let mut current = doc;
    if let Some(parent_path) = parent_path {
        for part in parent_path.split('.') {
            current = match current {
                Value::Object(map) => map
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new())),
                Value::Array(arr) => match part.parse::<usize>().ok().and_then(|i| arr.get_mut(i)) {
                    Some(slot) => slot,
                    // Cannot address past the end of an array
                    None => return,
                },
                // Cannot navigate into a scalar
                _ => return,
            };
        }
    }

    match current {
        Value::Object(map) => {
            map.insert(leaf.to_string(), value);
        }
        Value::Array(arr) => {
            if let Some(slot) = leaf.parse::<usize>().ok().and_then(|i| arr.get_mut(i)) {
                *slot = value;
            }
        }
        _ => {}
    }
}

/// Remove the value at a nested path, returning it
pub fn remove_nested_value(doc: &mut Value, path: &str) -> Option<Value> {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let mut parent = doc;
    if let Some(parent_path) = parent_path {
        for part in parent_path.split('.') {
            parent = match parent {
                Value::Object(map) => map.get_mut(part)?,
                Value::Array(arr) => arr.get_mut(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }

    match parent {
        Value::Object(map) => map.remove(leaf),
        // Array slots are nulled, not shifted
        Value::Array(arr) => {
            let slot = arr.get_mut(leaf.parse::<usize>().ok()?)?;
            Some(std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

/// Compare two JSON values of compatible types
///
/// Returns `None` for incompatible types (string vs number, ...).
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use vellum_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => n1.as_f64()?.partial_cmp(&n2.as_f64()?),
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used by sorting: missing < null < number < string < bool < object < array
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv)
            .unwrap_or_else(|| type_priority(av).cmp(&type_priority(bv))),
    }
}

fn type_priority(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}

/// Canonical string form of a JSON value with object keys sorted
///
/// Two logically equal values always produce the same string regardless of
/// member insertion order.
///
/// ```
/// use serde_json::json;
/// use vellum_core::value_utils::canonical_json_string;
///
/// let v1 = json!({"a": 1, "b": 2});
/// let v2 = json!({"b": 2, "a": 1});
/// assert_eq!(canonical_json_string(&v1), canonical_json_string(&v2));
/// ```
pub fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", Value::String((*k).clone()), canonical_json_string(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner = arr
                .iter()
                .map(canonical_json_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        _ => value.to_string(),
    }
}
