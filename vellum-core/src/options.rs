// vellum-core/src/options.rs
// Find query options: sort, skip, limit and backend pagination hints

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::value_utils::compare_for_sort;

/// Key range hint (`from` and `to` are primary keys)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub from: String,
    pub to: String,
}

/// Cursor offset hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetHint {
    pub value: String,
    pub direction: i32,
}

/// Options for find queries
///
/// `range`, `offset` and `index` are backend-specific hints. The bundled
/// backends accept and ignore them, but they still take part in the cache
/// fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    /// Sort: [(field, direction)], direction: 1 (asc) or -1 (desc)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<(String, i32)>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<KeyRange>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<OffsetHint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<Value>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_range(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.range = Some(KeyRange {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn with_index(mut self, index: Value) -> Self {
        self.index = Some(index);
        self
    }

    /// Whether any hint the bundled backends ignore is set
    pub fn has_backend_hints(&self) -> bool {
        self.range.is_some() || self.offset.is_some() || self.index.is_some()
    }

    /// Sort, then skip, then limit
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        apply_sort(&mut docs, &self.sort);
        apply_skip_limit(docs, self.skip, self.limit)
    }
}

/// Stable multi-key sort with dot notation support
pub fn apply_sort(docs: &mut [Document], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let cmp = compare_for_sort(a.get(field), b.get(field));
            if cmp != std::cmp::Ordering::Equal {
                return if *direction >= 0 { cmp } else { cmp.reverse() };
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Apply skip and limit to documents
pub fn apply_skip_limit(docs: Vec<Document>, skip: Option<usize>, limit: Option<usize>) -> Vec<Document> {
    let skip = skip.unwrap_or(0);
    let limit = limit.unwrap_or(usize::MAX);
    docs.into_iter().skip(skip).take(limit).collect()
}
