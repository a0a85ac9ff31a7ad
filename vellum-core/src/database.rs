// vellum-core/src/database.rs
// Named set of collections over one storage backend

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broadcast::{Broadcaster, NoopBroadcast};
use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::object_store::{FileObjectStore, ObjectStore};
use crate::query::JsonEvaluator;
use crate::storage::{MemoryStorage, PersistentStorage, Storage};
use crate::{log_error, log_info, log_warn};

pub use crate::object_store::IndexSpec;

/// Collection declaration: one physical store keyed by `id`, plus
/// optional secondary indexes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registrar {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl Registrar {
    pub fn new(name: impl Into<String>) -> Self {
        Registrar {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    pub name: String,
    pub registrars: Vec<Registrar>,
    pub config: StoreConfig,
}

impl DatabaseOptions {
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseOptions {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn register(mut self, registrar: Registrar) -> Self {
        self.registrars.push(registrar);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }
}

/// Page of a durable export; `offset` is an inclusive id lower bound
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub offset: Option<String>,
    pub limit: Option<usize>,
}

/// Database over storage backend `S`
///
/// Collections are fixed at construction and kept in registration order,
/// which is also the order `flush` and `close` visit them in.
pub struct Database<S: Storage> {
    name: String,
    collections: IndexMap<String, Collection<S>>,
    store: Option<Arc<dyn ObjectStore>>,
    closed: AtomicBool,
}

impl<S: Storage> Database<S> {
    fn from_storages(name: String, storages: Vec<S>, store: Option<Arc<dyn ObjectStore>>) -> Self {
        let mut collections = IndexMap::with_capacity(storages.len());
        for storage in storages {
            let collection = Collection::new(Arc::new(storage));
            collections.insert(collection.name().to_string(), collection);
        }
        Database {
            name,
            collections,
            store,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fails with `CollectionNotFound` for names that were never registered
    pub fn collection(&self, name: &str) -> Result<Collection<S>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    /// Flush every collection; the first error is returned after all ran
    pub fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for collection in self.collections.values() {
            if let Err(e) = collection.flush() {
                log_error!("{}: flush of {} failed: {}", self.name, collection.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drain every collection's queued writes
    pub fn save(&self) -> Result<()> {
        let mut first_error = None;
        for collection in self.collections.values() {
            if let Err(e) = collection.storage().save() {
                log_error!("{}: save of {} failed: {}", self.name, collection.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drain, then release channels and workers in registration order.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let saved = self.save();
        for collection in self.collections.values() {
            collection.storage().destroy();
        }
        if let Some(store) = &self.store {
            store.close()?;
        }
        log_info!("Closed database {}", self.name);
        saved
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Keep the first registration of a name
fn unique_registrars(options: &DatabaseOptions) -> Vec<&Registrar> {
    let mut seen = IndexMap::new();
    for registrar in &options.registrars {
        if seen.contains_key(&registrar.name) {
            log_warn!("{}: collection {} registered twice", options.name, registrar.name);
            continue;
        }
        seen.insert(registrar.name.clone(), registrar);
    }
    seen.into_values().collect()
}

impl Database<MemoryStorage> {
    /// Volatile database whose collections share nothing with other contexts
    pub fn memory(options: DatabaseOptions) -> Self {
        let storages = unique_registrars(&options)
            .into_iter()
            .map(|registrar| MemoryStorage::new(&registrar.name))
            .collect();
        Self::from_storages(options.name, storages, None)
    }

    /// Volatile database kept in sync with other contexts through `broadcaster`
    pub fn memory_with_broadcast(options: DatabaseOptions, broadcaster: &dyn Broadcaster) -> Result<Self> {
        let storages = unique_registrars(&options)
            .into_iter()
            .map(|registrar| {
                MemoryStorage::open(&registrar.name, &options.config, broadcaster, Arc::new(JsonEvaluator))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_storages(options.name, storages, None))
    }
}

impl Database<PersistentStorage> {
    /// Register every collection's store and hydrate it
    pub fn open(options: DatabaseOptions, store: Arc<dyn ObjectStore>, broadcaster: &dyn Broadcaster) -> Result<Self> {
        store.ready()?;

        let mut storages = Vec::with_capacity(options.registrars.len());
        for registrar in unique_registrars(&options) {
            store.create_store(&registrar.name, &registrar.indexes)?;
            let storage = PersistentStorage::open(
                &registrar.name,
                Arc::clone(&store),
                options.config.clone(),
                broadcaster,
                Arc::new(JsonEvaluator),
            )?;
            storage.resolve()?;
            storages.push(storage);
        }

        log_info!("Opened database {} ({} collections)", options.name, storages.len());
        Ok(Self::from_storages(options.name, storages, Some(store)))
    }

    /// File-backed database without broadcast
    pub fn open_file<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(path)?);
        Self::open(options, store, &NoopBroadcast)
    }

    /// Durable content of a store, in id order
    ///
    /// Reads the object store directly: mutations still queued are not included.
    pub fn export(&self, name: &str, options: &ExportOptions) -> Result<Vec<Document>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| VellumError::BackendUnavailable(name.to_string()))?;
        store.get_range(name, options.offset.as_deref(), options.limit)
    }

    pub fn object_store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> DatabaseOptions {
        DatabaseOptions::new("app")
            .register(Registrar::new("users").with_index(IndexSpec::new("email").unique()))
            .register(Registrar::new("posts"))
    }

    #[test]
    fn test_collection_not_found() {
        let db = Database::memory(options());
        assert!(db.collection("users").is_ok());
        assert!(matches!(
            db.collection("comments"),
            Err(VellumError::CollectionNotFound(name)) if name == "comments"
        ));
        assert_eq!(db.collection_names(), vec!["users", "posts"]);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let db = Database::memory(options().register(Registrar::new("users")));
        assert_eq!(db.collection_names(), vec!["users", "posts"]);
    }

    #[test]
    fn test_flush_cascades() {
        let db = Database::memory(options());
        db.collection("users").unwrap().insert_one(json!({"id": "u"})).unwrap();
        db.collection("posts").unwrap().insert_one(json!({"id": "p"})).unwrap();

        db.flush().unwrap();
        assert_eq!(db.collection("users").unwrap().count(&json!({})).unwrap(), 0);
        assert_eq!(db.collection("posts").unwrap().count(&json!({})).unwrap(), 0);
    }

    #[test]
    fn test_registrar_deserializes_without_indexes() {
        let registrar: Registrar = serde_json::from_value(json!({"name": "users"})).unwrap();
        assert_eq!(registrar, Registrar::new("users"));
    }
}
