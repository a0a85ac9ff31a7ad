// src/query/mod.rs
//! Filter and update evaluation
//!
//! The storage engine never interprets filter or update expressions itself.
//! It hands them to an [`Evaluator`], a pluggable capability:
//!
//! ```text
//! Storage ──► Evaluator::matches(doc, filter) -> bool
//!         └─► Evaluator::apply(doc, update)   -> changed
//! ```
//!
//! [`JsonEvaluator`] is the bundled implementation of a MongoDB-style subset.
//! Errors it raises (`InvalidQuery`) are not caught by the storage layer.

pub mod operators;
pub mod update;

use serde_json::Value;

use crate::document::Document;
use crate::error::Result;

pub use operators::matches_filter;
pub use update::apply_update;

/// Query/update evaluation capability
pub trait Evaluator: Send + Sync {
    /// Does `document` satisfy `filter`? An empty object matches everything.
    fn matches(&self, document: &Document, filter: &Value) -> Result<bool>;

    /// Apply `update` in place. Returns whether the content changed.
    fn apply(&self, document: &mut Document, update: &Value) -> Result<bool>;
}

/// Operator-registry evaluator over JSON filters
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEvaluator;

impl Evaluator for JsonEvaluator {
    fn matches(&self, document: &Document, filter: &Value) -> Result<bool> {
        matches_filter(document, filter)
    }

    fn apply(&self, document: &mut Document, update: &Value) -> Result<bool> {
        apply_update(document, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_evaluator_roundtrip() {
        let evaluator = JsonEvaluator;
        let mut doc = Document::from_value(json!({"id": "1", "count": 1})).unwrap();

        assert!(evaluator.matches(&doc, &json!({"count": 1})).unwrap());
        assert!(evaluator.apply(&mut doc, &json!({"$inc": {"count": 2}})).unwrap());
        assert!(evaluator.matches(&doc, &json!({"count": {"$gte": 3}})).unwrap());
    }

    #[test]
    fn test_evaluator_as_trait_object() {
        let evaluator: Box<dyn Evaluator> = Box::new(JsonEvaluator);
        let doc = Document::from_value(json!({"id": "1"})).unwrap();
        assert!(evaluator.matches(&doc, &json!({})).unwrap());
    }
}
