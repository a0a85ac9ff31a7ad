// src/query/operators.rs
//! Query operator implementations
//!
//! Each operator is a separate type implementing [`OperatorMatcher`] and is
//! looked up by name in a static registry.
//!
//! ```text
//! OperatorMatcher
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Array          │ Logical        │
//! │ ($eq, $gt...)  │ ($in, $size..) │ ($and, $or...) │
//! └────────────────┴────────────────┴────────────────┘
//! ```

use lazy_static::lazy_static;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::value_utils::compare_values;

/// A single filter operator
pub trait OperatorMatcher: Send + Sync {
    /// Operator name (e.g. "$eq")
    fn name(&self) -> &'static str;

    /// - `doc_value`: the field value, `None` when the field is missing
    /// - `filter_value`: the operand from the filter
    /// - `document`: full document, needed by logical operators
    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq, including array element matching
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        Ok(value_equals(doc_value, filter_value))
    }
}

/// $ne: a missing field is "not equal"
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        Ok(!value_equals(doc_value, filter_value))
    }
}

/// $gt / $gte / $lt / $lte share one implementation
pub struct CompareOperator {
    name: &'static str,
    accept: fn(Ordering) -> bool,
}

impl OperatorMatcher for CompareOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let accept = self.accept;
        let hit = |v: &Value| compare_values(v, filter_value).map(accept).unwrap_or(false);
        Ok(match doc_value {
            None => false,
            Some(Value::Array(items)) => items.iter().any(|item| hit(item)),
            Some(v) => hit(v),
        })
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// $in: field equals any listed value
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let candidates = expect_array(self.name(), filter_value)?;
        Ok(candidates.iter().any(|c| value_equals(doc_value, c)))
    }
}

/// $nin: field equals none of the listed values
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let candidates = expect_array(self.name(), filter_value)?;
        Ok(!candidates.iter().any(|c| value_equals(doc_value, c)))
    }
}

/// $all: array field contains every listed value
pub struct AllOperator;

impl OperatorMatcher for AllOperator {
    fn name(&self) -> &'static str {
        "$all"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let required = expect_array(self.name(), filter_value)?;
        Ok(match doc_value {
            Some(Value::Array(items)) => required.iter().all(|r| items.contains(r)),
            _ => false,
        })
    }
}

/// $size: array length
pub struct SizeOperator;

impl OperatorMatcher for SizeOperator {
    fn name(&self) -> &'static str {
        "$size"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let size = filter_value
            .as_u64()
            .ok_or_else(|| VellumError::InvalidQuery("$size operator requires a non-negative integer".to_string()))?;
        Ok(matches!(doc_value, Some(Value::Array(items)) if items.len() as u64 == size))
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, _: Option<&Document>) -> Result<bool> {
        let should_exist = filter_value
            .as_bool()
            .ok_or_else(|| VellumError::InvalidQuery("$exists operator requires a boolean".to_string()))?;
        Ok(doc_value.is_some() == should_exist)
    }
}

/// $not: negates a field-level operator expression
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value, document: Option<&Document>) -> Result<bool> {
        if !filter_value.is_object() {
            return Err(VellumError::InvalidQuery("$not operator requires an operator expression".to_string()));
        }
        Ok(!matches_condition(doc_value, filter_value, document)?)
    }
}

// ============================================================================
// LOGICAL OPERATORS (top level)
// ============================================================================

/// $and / $or / $nor over a list of sub-filters
pub struct LogicalOperator {
    name: &'static str,
}

impl OperatorMatcher for LogicalOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, _: Option<&Value>, filter_value: &Value, document: Option<&Document>) -> Result<bool> {
        let document = document.ok_or_else(|| {
            VellumError::InvalidQuery(format!("{} operator requires document context", self.name))
        })?;
        let clauses = expect_array(self.name, filter_value)?;

        match self.name {
            "$and" => {
                for clause in clauses {
                    if !matches_filter(document, clause)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            "$or" => {
                for clause in clauses {
                    if matches_filter(document, clause)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => {
                for clause in clauses {
                    if matches_filter(document, clause)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

lazy_static! {
    /// All filter operators by name. Immutable after initialization.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();
        let mut register = |op: Box<dyn OperatorMatcher>| {
            registry.insert(op.name(), op);
        };

        // Comparison
        register(Box::new(EqOperator));
        register(Box::new(NeOperator));
        register(Box::new(CompareOperator { name: "$gt", accept: |o| o == Ordering::Greater }));
        register(Box::new(CompareOperator { name: "$gte", accept: |o| o != Ordering::Less }));
        register(Box::new(CompareOperator { name: "$lt", accept: |o| o == Ordering::Less }));
        register(Box::new(CompareOperator { name: "$lte", accept: |o| o != Ordering::Greater }));

        // Array
        register(Box::new(InOperator));
        register(Box::new(NinOperator));
        register(Box::new(AllOperator));
        register(Box::new(SizeOperator));

        // Element
        register(Box::new(ExistsOperator));
        register(Box::new(NotOperator));

        // Logical
        register(Box::new(LogicalOperator { name: "$and" }));
        register(Box::new(LogicalOperator { name: "$or" }));
        register(Box::new(LogicalOperator { name: "$nor" }));

        registry
    };
}

// ============================================================================
// HELPERS
// ============================================================================

fn expect_array<'a>(op: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| VellumError::InvalidQuery(format!("{} operator requires an array", op)))
}

/// Equality with array element matching: `{tags: "a"}` matches `tags: ["a", "b"]`
fn value_equals(doc_value: Option<&Value>, expected: &Value) -> bool {
    match doc_value {
        None => expected.is_null(),
        Some(v) if v == expected => true,
        Some(Value::Array(items)) => items.iter().any(|item| item == expected),
        Some(v) => compare_values(v, expected) == Some(Ordering::Equal) && v.is_number(),
    }
}

/// Is `condition` an operator expression (`{"$gt": 1}`) rather than a literal?
fn is_operator_expression(condition: &Value) -> bool {
    match condition {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Match one field value against a literal or an operator expression
fn matches_condition(doc_value: Option<&Value>, condition: &Value, document: Option<&Document>) -> Result<bool> {
    if !is_operator_expression(condition) {
        return Ok(value_equals(doc_value, condition));
    }

    // Checked by is_operator_expression
    let Value::Object(ops) = condition else {
        return Ok(false);
    };
    for (op_name, operand) in ops {
        let operator = OPERATOR_REGISTRY
            .get(op_name.as_str())
            .ok_or_else(|| VellumError::InvalidQuery(format!("Unknown operator: {}", op_name)))?;
        if !operator.matches(doc_value, operand, document)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Main entry point for filter matching
///
/// - `Ok(true)` / `Ok(false)`: document does / does not match
/// - `Err(InvalidQuery)`: malformed filter
pub fn matches_filter(document: &Document, filter: &Value) -> Result<bool> {
    let filter_obj = match filter {
        Value::Null => return Ok(true),
        Value::Object(obj) => obj,
        _ => return Err(VellumError::InvalidQuery("Filter must be an object".to_string())),
    };

    for (key, condition) in filter_obj {
        if key.starts_with('$') {
            let operator = OPERATOR_REGISTRY
                .get(key.as_str())
                .ok_or_else(|| VellumError::InvalidQuery(format!("Unknown operator: {}", key)))?;
            if !operator.matches(None, condition, Some(document))? {
                return Ok(false);
            }
        } else if !matches_condition(document.get(key), condition, Some(document))? {
            return Ok(false);
        }
    }
    Ok(true)
}
