// vellum-core/src/object_store/mod.rs
//! Durable key-value backend abstraction
//!
//! An object store holds one physical store per collection name, keyed by
//! the document `id`. Storages never read it on the hot path: it is hydrated
//! once by `resolve()` and afterwards only receives committed chunks from
//! the pending-write coalescer.

pub mod file_store;
pub mod memory_store;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;

pub use file_store::FileObjectStore;
pub use memory_store::MemoryObjectStore;

/// Secondary index declared at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub key_path: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(key_path: impl Into<String>) -> Self {
        IndexSpec {
            key_path: key_path.into(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One durable transaction: removals are applied before upserts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub removals: Vec<String>,
    pub upserts: Vec<Document>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.upserts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.removals.len() + self.upserts.len()
    }
}

/// Durable object store capability
///
/// All reads return documents in primary-key order.
pub trait ObjectStore: Send + Sync {
    /// Fails with `BackendUnavailable` while the backend is still opening
    fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// Create the store if missing; existing content is kept
    fn create_store(&self, name: &str, indexes: &[IndexSpec]) -> Result<()>;

    fn store_names(&self) -> Result<Vec<String>>;

    fn get_all(&self, name: &str) -> Result<Vec<Document>>;

    /// Documents whose id is `>= offset`, at most `limit` of them
    fn get_range(&self, name: &str, offset: Option<&str>, limit: Option<usize>) -> Result<Vec<Document>>;

    fn put(&self, name: &str, document: Document) -> Result<()>;

    fn delete(&self, name: &str, id: &str) -> Result<()>;

    fn clear(&self, name: &str) -> Result<()>;

    /// Apply a batch atomically: either every item lands or none does
    fn commit(&self, name: &str, batch: WriteBatch) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
