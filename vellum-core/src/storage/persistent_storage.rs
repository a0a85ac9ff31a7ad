// vellum-core/src/storage/persistent_storage.rs
// Durable storage backend: live index hydrated from an object store,
// mutations mirrored through the pending-write coalescer

use crossbeam::channel::Receiver;
use serde_json::Value;
use std::sync::Arc;

use super::{
    ChangeEvent, InsertManyResult, InsertOneResult, RemoveResult, Status, StatusCell, Storage,
    StorageCore, UpdateResult,
};
use crate::broadcast::{Broadcaster, NoopBroadcast};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::object_store::ObjectStore;
use crate::options::FindOptions;
use crate::pending::PendingWrites;
use crate::query::{Evaluator, JsonEvaluator};
use crate::query_cache::QueryCache;
use crate::{log_debug, log_info};

/// Storage backed by an [`ObjectStore`]
///
/// Starts in `Loading`; `resolve()` reads the durable collection into the
/// live index and flips the status to `Ready`. Until then every data
/// operation fails with `BackendUnavailable`. Writes return once the live
/// index is updated and the mutation is queued; durability follows through
/// the commit worker or an explicit `save()`.
pub struct PersistentStorage {
    core: Arc<StorageCore>,
    store: Arc<dyn ObjectStore>,
    pending: Arc<PendingWrites>,
}

impl PersistentStorage {
    /// Default evaluator, no broadcast channel
    pub fn new(name: &str, store: Arc<dyn ObjectStore>, config: StoreConfig) -> Result<Self> {
        Self::open(name, store, config, &NoopBroadcast, Arc::new(JsonEvaluator))
    }

    pub fn open(
        name: &str,
        store: Arc<dyn ObjectStore>,
        config: StoreConfig,
        broadcaster: &dyn Broadcaster,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        let config = config.normalized();
        let status = Arc::new(StatusCell::loading());
        let pending = PendingWrites::new(name, Arc::clone(&store), Arc::clone(&status), config.clone())?;
        let core = StorageCore::new(
            name,
            evaluator,
            status,
            Some(Arc::clone(&pending)),
            config.cache_capacity,
        );
        core.attach(broadcaster)?;

        Ok(PersistentStorage { core, store, pending })
    }

    pub fn cache(&self) -> &QueryCache {
        self.core.cache()
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// The live index is only authoritative once hydrated
    fn ensure_ready(&self) -> Result<()> {
        if self.core.status().is_ready() {
            Ok(())
        } else {
            Err(VellumError::BackendUnavailable(self.name().to_string()))
        }
    }
}

impl Storage for PersistentStorage {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn status(&self) -> Status {
        self.core.status().get()
    }

    fn resolve(&self) -> Result<()> {
        if self.core.status().is_ready() {
            return Ok(());
        }
        self.store.ready()?;
        let documents = self.store.get_all(self.name())?;
        let total = documents.len();
        let loaded = self.core.hydrate(documents);

        if self.core.status().mark_ready() {
            log_info!("{}: hydrated {} of {} stored documents", self.name(), loaded, total);
            // Mutations queued while loading can drain now
            if self.pending.pending_len() > 0 {
                self.pending.schedule();
            }
        }
        Ok(())
    }

    fn has(&self, id: &str) -> bool {
        self.core.has(id)
    }

    fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        self.ensure_ready()?;
        self.core.insert_one(document)
    }

    fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        self.ensure_ready()?;
        self.core.insert_many(documents)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.ensure_ready()?;
        Ok(self.core.find_by_id(id))
    }

    fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        self.ensure_ready()?;
        self.core.find(filter, options)
    }

    fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.ensure_ready()?;
        self.core.update_one(filter, update)
    }

    fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.ensure_ready()?;
        self.core.update_many(filter, update)
    }

    fn replace(&self, filter: &Value, document: Value) -> Result<UpdateResult> {
        self.ensure_ready()?;
        self.core.replace(filter, document)
    }

    fn remove(&self, filter: &Value) -> Result<RemoveResult> {
        self.ensure_ready()?;
        self.core.remove(filter)
    }

    fn count(&self, filter: &Value) -> Result<usize> {
        self.ensure_ready()?;
        self.core.count(filter)
    }

    /// Clears the durable collection as well as the live index
    fn flush(&self) -> Result<()> {
        self.ensure_ready()?;
        self.core.flush(|| {
            self.store.clear(self.name())?;
            log_debug!("{}: cleared durable store", self.name());
            Ok(())
        })
    }

    fn save(&self) -> Result<()> {
        self.pending.save()
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.core.subscribe()
    }

    fn destroy(&self) {
        self.core.detach();
        self.pending.shutdown();
    }
}
