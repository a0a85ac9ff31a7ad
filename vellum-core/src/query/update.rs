// src/query/update.rs
// Field-level update operators: $set, $unset, $inc, $push, $pull

use serde_json::{Map, Value};

use crate::document::{Document, ID_FIELD};
use crate::error::{Result, VellumError};

/// Apply an update expression to `document` - returns whether it changed
///
/// Writes targeting `id` are ignored so an update can never move a document
/// to another key.
pub fn apply_update(document: &mut Document, update: &Value) -> Result<bool> {
    let ops = update
        .as_object()
        .ok_or_else(|| VellumError::InvalidQuery("Update must be an object".to_string()))?;
    if ops.is_empty() || ops.keys().any(|k| !k.starts_with('$')) {
        return Err(VellumError::InvalidQuery(
            "Update must only contain update operators ($set, $inc, ...)".to_string(),
        ));
    }

    let mut changed = false;
    for (op, fields) in ops {
        let fields = fields
            .as_object()
            .ok_or_else(|| VellumError::InvalidQuery(format!("{} requires an object", op)))?;

        for (path, operand) in fields {
            if path == ID_FIELD {
                continue;
            }
            changed |= match op.as_str() {
                "$set" => set(document, path, operand.clone()),
                "$unset" => document.remove(path).is_some(),
                "$inc" => inc(document, path, operand)?,
                "$push" => push(document, path, operand)?,
                "$pull" => pull(document, path, operand)?,
                other => {
                    return Err(VellumError::InvalidQuery(format!(
                        "Unknown update operator: {}",
                        other
                    )))
                }
            };
        }
    }
    Ok(changed)
}

fn set(document: &mut Document, path: &str, value: Value) -> bool {
    if document.get(path) == Some(&value) {
        return false;
    }
    document.set(path, value);
    true
}

fn inc(document: &mut Document, path: &str, amount: &Value) -> Result<bool> {
    if !amount.is_number() {
        return Err(VellumError::InvalidQuery(format!("$inc: amount for '{}' must be a number", path)));
    }

    let next = match document.get(path) {
        None => amount.clone(),
        Some(current) => {
            // Try int first to preserve integer types
            if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
                a.checked_add(b).map(Value::from).ok_or_else(|| {
                    VellumError::InvalidQuery(format!("$inc: integer overflow on '{}'", path))
                })?
            } else if let (Some(a), Some(b)) = (current.as_f64(), amount.as_f64()) {
                Value::from(a + b)
            } else {
                return Err(VellumError::InvalidQuery(format!(
                    "$inc: field '{}' is not a number",
                    path
                )));
            }
        }
    };
    Ok(set(document, path, next))
}

fn push(document: &mut Document, path: &str, operand: &Value) -> Result<bool> {
    // {"$push": {"tags": {"$each": ["a", "b"]}}}
    let items = match operand {
        Value::Object(modifiers) if modifiers.contains_key("$each") => match &modifiers["$each"] {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        },
        single => vec![single.clone()],
    };
    if items.is_empty() {
        return Ok(false);
    }

    let mut array = match document.get(path) {
        None => Vec::new(),
        Some(Value::Array(existing)) => existing.clone(),
        Some(_) => {
            return Err(VellumError::InvalidQuery(format!(
                "$push: field '{}' is not an array",
                path
            )))
        }
    };
    array.extend(items);
    document.set(path, Value::Array(array));
    Ok(true)
}

fn pull(document: &mut Document, path: &str, operand: &Value) -> Result<bool> {
    let existing = match document.get(path) {
        Some(Value::Array(existing)) => existing.clone(),
        _ => return Ok(false),
    };

    let mut kept = Vec::with_capacity(existing.len());
    for item in existing.iter() {
        if !pull_matches(item, operand)? {
            kept.push(item.clone());
        }
    }
    if kept.len() == existing.len() {
        return Ok(false);
    }
    document.set(path, Value::Array(kept));
    Ok(true)
}

/// `$pull` operand is either a literal or a condition over the element
fn pull_matches(item: &Value, operand: &Value) -> Result<bool> {
    match operand {
        Value::Object(cond) if cond.keys().all(|k| k.starts_with('$')) && !cond.is_empty() => {
            // Evaluate the condition as a filter on a wrapper document
            let mut wrapper = Map::new();
            wrapper.insert(ID_FIELD.to_string(), Value::String(String::new()));
            wrapper.insert("v".to_string(), item.clone());
            let wrapper = Document::from_value(Value::Object(wrapper))?;
            let mut filter = Map::new();
            filter.insert("v".to_string(), operand.clone());
            super::matches_filter(&wrapper, &Value::Object(filter))
        }
        literal => Ok(item == literal),
    }
}
