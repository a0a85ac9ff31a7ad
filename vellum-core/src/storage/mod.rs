// vellum-core/src/storage/mod.rs
//! Per-collection storage abstraction
//!
//! Every backend keeps the whole collection in a live in-memory index that
//! serves all reads. Writes mutate the index first, then flush the query
//! cache, notify subscribers, broadcast to other contexts and (for durable
//! backends) enqueue the mutation for write-behind persistence.
//!
//! ```text
//! Storage trait
//!   ├── MemoryStorage      (volatile, ready at construction)
//!   └── PersistentStorage  (hydrated from an ObjectStore, owns PendingWrites)
//! ```

mod shared;
pub mod memory_storage;
pub mod persistent_storage;

use crossbeam::channel::Receiver;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::document::Document;
use crate::error::Result;
use crate::options::FindOptions;

pub use memory_storage::MemoryStorage;
pub use persistent_storage::PersistentStorage;

pub(crate) use shared::StorageCore;

/// Live documents of one collection, in insertion order
pub type LiveIndex = IndexMap<String, Document>;

/// Storage lifecycle. `Loading` until hydrated, then `Ready` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Ready,
}

/// Shared status flag, also read by the pending-write coalescer
#[derive(Debug, Default)]
pub struct StatusCell(AtomicBool);

impl StatusCell {
    pub fn loading() -> Self {
        StatusCell(AtomicBool::new(false))
    }

    pub fn ready() -> Self {
        StatusCell(AtomicBool::new(true))
    }

    pub fn get(&self) -> Status {
        if self.is_ready() {
            Status::Ready
        } else {
            Status::Loading
        }
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true on the loading -> ready transition
    pub fn mark_ready(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// Change notification, emitted locally and broadcast to other contexts
///
/// Serialized as `{"type": "insertOne", "data": ...}`; `flush` carries no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ChangeEvent {
    InsertOne(Document),
    UpdateOne(Document),
    InsertMany(Vec<Document>),
    UpdateMany(Vec<Document>),
    Remove(Vec<Document>),
    Flush,
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::InsertOne(_) => "insertOne",
            ChangeEvent::UpdateOne(_) => "updateOne",
            ChangeEvent::InsertMany(_) => "insertMany",
            ChangeEvent::UpdateMany(_) => "updateMany",
            ChangeEvent::Remove(_) => "remove",
            ChangeEvent::Flush => "flush",
        }
    }

    /// Documents carried by the event
    pub fn documents(&self) -> Vec<&Document> {
        match self {
            ChangeEvent::InsertOne(doc) | ChangeEvent::UpdateOne(doc) => vec![doc],
            ChangeEvent::InsertMany(docs) | ChangeEvent::UpdateMany(docs) | ChangeEvent::Remove(docs) => {
                docs.iter().collect()
            }
            ChangeEvent::Flush => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOneResult {
    pub inserted_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<String>,
}

impl InsertManyResult {
    pub fn inserted_count(&self) -> usize {
        self.inserted_ids.len()
    }
}

/// Outcome of update and replace operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: usize,
    pub modified: usize,
}

impl UpdateResult {
    pub fn new(matched: usize, modified: usize) -> Self {
        UpdateResult { matched, modified }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveResult {
    pub removed: usize,
}

/// Core storage abstraction for one named collection
///
/// Filters and update expressions are interpreted by the backend's
/// [`Evaluator`](crate::query::Evaluator); its errors propagate unchanged.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use vellum_core::{FindOptions, MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new("users");
/// storage.insert_one(json!({"id": "user-1", "name": "John Doe"})).unwrap();
/// let found = storage.find(&json!({"name": "John Doe"}), &FindOptions::default()).unwrap();
/// assert_eq!(found.len(), 1);
/// ```
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> Status;

    fn is(&self, status: Status) -> bool {
        self.status() == status
    }

    /// Hydrate the live index from the durable backend. Idempotent.
    fn resolve(&self) -> Result<()>;

    fn has(&self, id: &str) -> bool;

    /// Insert one document, assigning an id when absent
    ///
    /// Fails with `DuplicateDocument` if the id is already live.
    fn insert_one(&self, document: Value) -> Result<InsertOneResult>;

    /// Insert a batch; a duplicate anywhere fails the whole batch
    fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult>;

    fn find_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Filter, then sort/skip/limit. Served from the query cache when possible.
    fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>>;

    /// Update the first match in index order
    fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult>;

    fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult>;

    /// Overwrite every match with `document`. Matched and modified are equal.
    fn replace(&self, filter: &Value, document: Value) -> Result<UpdateResult>;

    fn remove(&self, filter: &Value) -> Result<RemoveResult>;

    /// Full scan through the evaluator, never cached
    fn count(&self, filter: &Value) -> Result<usize>;

    /// Destructive reset of the collection
    fn flush(&self) -> Result<()>;

    /// Wait until queued mutations are durable
    fn save(&self) -> Result<()>;

    /// Receive every subsequent change event, local or broadcast
    fn subscribe(&self) -> Receiver<ChangeEvent>;

    /// Release the broadcast subscription and background workers
    fn destroy(&self);
}
