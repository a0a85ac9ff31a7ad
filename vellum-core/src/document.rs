// src/document.rs
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, VellumError};
use crate::value_utils::{get_nested_value, remove_nested_value, set_nested_value};

/// Primary key member of every document
pub const ID_FIELD: &str = "id";

/// Open-ended JSON record with a required string `id`
///
/// Identity is the `id`; the remaining members are opaque to the storage
/// layer and only interpreted by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Build a document from a JSON value that already carries a string `id`
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(VellumError::InvalidDocument(format!(
                "document must be an object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Build a document, assigning a UUID v4 `id` when none is present
    pub fn with_generated_id(value: Value) -> Result<Self> {
        match value {
            Value::Object(mut map) => {
                if !map.contains_key(ID_FIELD) {
                    map.insert(ID_FIELD.to_string(), Value::String(new_id()));
                }
                Self::from_map(map)
            }
            other => Err(VellumError::InvalidDocument(format!(
                "document must be an object, got {}",
                type_name(&other)
            ))),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self> {
        match map.get(ID_FIELD) {
            Some(Value::String(_)) => Ok(Document(map)),
            Some(other) => Err(VellumError::InvalidDocument(format!(
                "'id' must be a string, got {}",
                type_name(other)
            ))),
            None => Err(VellumError::InvalidDocument("missing 'id'".to_string())),
        }
    }

    pub fn id(&self) -> &str {
        // Invariant held by every constructor and by `set`/`remove`
        self.0.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default()
    }

    /// Field lookup with dot notation ("address.city", "tags.0")
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        match path.split_once('.') {
            None => self.0.get(path),
            Some((head, rest)) => get_nested_value(self.0.get(head)?, rest),
        }
    }

    /// Set a field (dot notation creates intermediate objects).
    /// Writes to `id` are ignored.
    pub fn set(&mut self, path: &str, value: Value) {
        if path == ID_FIELD || path.is_empty() {
            return;
        }
        match path.split_once('.') {
            None => {
                self.0.insert(path.to_string(), value);
            }
            Some((head, rest)) => {
                let root = self
                    .0
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !root.is_object() && !root.is_array() {
                    *root = Value::Object(Map::new());
                }
                set_nested_value(root, rest, value);
            }
        }
    }

    /// Remove a field, returning the previous value. `id` cannot be removed.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        if path == ID_FIELD {
            return None;
        }
        match path.split_once('.') {
            None => self.0.remove(path),
            Some((head, rest)) => remove_nested_value(self.0.get_mut(head)?, rest),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Document::from_map(map).map_err(serde::de::Error::custom)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

/// New random document id (UUID v4)
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
