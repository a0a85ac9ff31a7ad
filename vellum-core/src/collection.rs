// vellum-core/src/collection.rs
// Typed handle over one storage instance

use crossbeam::channel::Receiver;
use serde_json::Value;
use std::sync::Arc;

use crate::document::Document;
use crate::error::Result;
use crate::options::FindOptions;
use crate::storage::{
    ChangeEvent, InsertManyResult, InsertOneResult, RemoveResult, Storage, UpdateResult,
};

/// Named collection backed by a [`Storage`]
///
/// Cheap to clone; clones share the storage.
pub struct Collection<S: Storage> {
    name: String,
    storage: Arc<S>,
}

impl<S: Storage> Clone for Collection<S> {
    fn clone(&self) -> Self {
        Collection {
            name: self.name.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage> Collection<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Collection {
            name: storage.name().to_string(),
            storage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        self.storage.insert_one(document)
    }

    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        self.storage.insert_many(documents)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.storage.find_by_id(id)
    }

    pub fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        self.storage.find(filter, options)
    }

    /// First document of `find` with the limit forced to 1
    pub fn find_one(&self, filter: &Value, options: &FindOptions) -> Result<Option<Document>> {
        let options = options.clone().with_limit(1);
        Ok(self.storage.find(filter, &options)?.into_iter().next())
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.storage.update_one(filter, update)
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.storage.update_many(filter, update)
    }

    pub fn replace(&self, filter: &Value, document: Value) -> Result<UpdateResult> {
        self.storage.replace(filter, document)
    }

    pub fn remove(&self, filter: &Value) -> Result<RemoveResult> {
        self.storage.remove(filter)
    }

    pub fn count(&self, filter: &Value) -> Result<usize> {
        self.storage.count(filter)
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.storage.subscribe()
    }
}
