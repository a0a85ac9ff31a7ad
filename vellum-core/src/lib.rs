// vellum-core/src/lib.rs
// Embedded document store: live in-memory index, query cache,
// write-behind persistence and cross-context change propagation

pub mod broadcast;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod logging;
pub mod object_store;
pub mod options;
pub mod pending;
pub mod query;
pub mod query_cache;
pub mod storage;
pub mod value_utils;

// Public exports
pub use broadcast::{BroadcastMessage, Broadcaster, Channel, LocalBroadcast, NoopBroadcast};
pub use collection::Collection;
pub use config::{CommitMode, StoreConfig};
pub use database::{Database, DatabaseOptions, ExportOptions, IndexSpec, Registrar};
pub use document::Document;
pub use error::{Result, VellumError};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use object_store::{FileObjectStore, MemoryObjectStore, ObjectStore, WriteBatch};
pub use options::FindOptions;
pub use pending::PendingWrites;
pub use query::{Evaluator, JsonEvaluator};
pub use query_cache::{CacheStats, QueryCache, QueryHash};
pub use storage::{
    ChangeEvent, InsertManyResult, InsertOneResult, MemoryStorage, PersistentStorage,
    RemoveResult, Status, Storage, UpdateResult,
};
