// vellum-core/src/query_cache.rs
// Query result caching with LRU eviction policy

use lru::LruCache;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use crate::config::DEFAULT_CACHE_CAPACITY;
use crate::document::Document;
use crate::options::FindOptions;
use crate::storage::LiveIndex;
use crate::value_utils::canonical_json_string;

/// Fingerprint of a query (filter + options)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHash(u64);

impl QueryHash {
    /// Hash the canonical JSON form of filter and options
    ///
    /// Object keys are sorted before hashing, so member order in the filter
    /// does not change the fingerprint.
    pub fn new(filter: &Value, options: &FindOptions) -> Self {
        let mut hasher = DefaultHasher::new();
        canonical_json_string(filter).hash(&mut hasher);
        let options = serde_json::to_value(options).unwrap_or(Value::Null);
        canonical_json_string(&options).hash(&mut hasher);
        QueryHash(hasher.finish())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Per-collection query cache
///
/// Stores only the ordered id list of a result. Documents are re-read from
/// the live index on `get`, so a hit always carries current field values.
/// Any mutation flushes the whole cache.
pub struct QueryCache {
    cache: RwLock<LruCache<QueryHash, Vec<String>>>,
    capacity: usize,
}

impl QueryCache {
    /// Create a new query cache with the given capacity (0 falls back to the default)
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CACHE_CAPACITY } else { capacity };
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            cache: RwLock::new(LruCache::new(bound)),
            capacity,
        }
    }

    /// Fingerprint a query; see [`QueryHash::new`]
    pub fn hash(&self, filter: &Value, options: &FindOptions) -> QueryHash {
        QueryHash::new(filter, options)
    }

    /// Record the membership and order of a result
    pub fn set(&self, hash: QueryHash, documents: &[Document]) {
        let ids = documents.iter().map(|d| d.id().to_string()).collect();
        self.cache.write().put(hash, ids);
    }

    /// Cached result re-materialized from `index`
    ///
    /// Returns `None` on a miss, or if any cached id is no longer live.
    /// A hit marks the fingerprint most recently used.
    pub fn get(&self, hash: &QueryHash, index: &LiveIndex) -> Option<Vec<Document>> {
        let mut cache = self.cache.write();
        let ids = cache.get(hash)?;
        ids.iter().map(|id| index.get(id).cloned()).collect()
    }

    /// Whether a fingerprint is cached, without touching documents
    pub fn contains(&self, hash: &QueryHash) -> bool {
        self.cache.read().contains(hash)
    }

    /// Drop every cached fingerprint
    pub fn flush(&self) {
        self.cache.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            size: self.cache.read().len(),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub size: usize,
}
