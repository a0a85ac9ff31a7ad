// vellum-core/src/storage/memory_storage.rs
// Volatile storage backend: live index only, no durable mirror

use crossbeam::channel::Receiver;
use serde_json::Value;
use std::sync::Arc;

use super::{
    ChangeEvent, InsertManyResult, InsertOneResult, RemoveResult, Status, StatusCell, Storage,
    StorageCore, UpdateResult,
};
use crate::broadcast::Broadcaster;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::Result;
use crate::options::FindOptions;
use crate::query::{Evaluator, JsonEvaluator};
use crate::query_cache::QueryCache;

/// In-memory storage for tests and ephemeral data
///
/// Ready at construction; `resolve` and `save` have nothing to do and
/// `flush` only clears the live index and cache.
pub struct MemoryStorage {
    core: Arc<StorageCore>,
}

impl MemoryStorage {
    /// Isolated storage with the default evaluator and no broadcast channel
    pub fn new(name: &str) -> Self {
        let config = StoreConfig::default();
        MemoryStorage {
            core: StorageCore::new(
                name,
                Arc::new(JsonEvaluator),
                Arc::new(StatusCell::ready()),
                None,
                config.cache_capacity,
            ),
        }
    }

    /// Storage subscribed to the collection's broadcast channel
    pub fn open(
        name: &str,
        config: &StoreConfig,
        broadcaster: &dyn Broadcaster,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        let core = StorageCore::new(
            name,
            evaluator,
            Arc::new(StatusCell::ready()),
            None,
            config.cache_capacity,
        );
        core.attach(broadcaster)?;
        Ok(MemoryStorage { core })
    }

    pub fn cache(&self) -> &QueryCache {
        self.core.cache()
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn status(&self) -> Status {
        self.core.status().get()
    }

    fn resolve(&self) -> Result<()> {
        Ok(())
    }

    fn has(&self, id: &str) -> bool {
        self.core.has(id)
    }

    fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        self.core.insert_one(document)
    }

    fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        self.core.insert_many(documents)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.core.find_by_id(id))
    }

    fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        self.core.find(filter, options)
    }

    fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.core.update_one(filter, update)
    }

    fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.core.update_many(filter, update)
    }

    fn replace(&self, filter: &Value, document: Value) -> Result<UpdateResult> {
        self.core.replace(filter, document)
    }

    fn remove(&self, filter: &Value) -> Result<RemoveResult> {
        self.core.remove(filter)
    }

    fn count(&self, filter: &Value) -> Result<usize> {
        self.core.count(filter)
    }

    fn flush(&self) -> Result<()> {
        self.core.flush(|| Ok(()))
    }

    fn save(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.core.subscribe()
    }

    fn destroy(&self) {
        self.core.detach();
    }
}
