//! Store configuration: commit scheduling, chunking and cache sizing
//!
//! Mutations are always applied to the live in-memory index first; the
//! configuration only decides how and when the queued copies reach the
//! object store.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of removals and upserts taken per durable transaction
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default number of cached query fingerprints per collection
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// How queued mutations are drained into the object store
///
/// # Modes
///
/// - **WriteBehind**: every enqueue schedules a deferred drain on the
///   collection's commit worker. Mutations issued before the worker wakes
///   share one transaction.
/// - **Manual**: nothing is committed until `save()` is called.
///
/// ```rust
/// use vellum_core::CommitMode;
///
/// assert!(CommitMode::default().is_auto());
/// assert!(!CommitMode::Manual.is_auto());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    #[default]
    WriteBehind,
    Manual,
}

impl CommitMode {
    /// Whether enqueues schedule a drain on their own
    pub fn is_auto(&self) -> bool {
        matches!(self, CommitMode::WriteBehind)
    }
}

/// Per-collection storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub commit_mode: CommitMode,
    /// Upper bound of removals (and of upserts) per committed chunk
    pub chunk_size: usize,
    /// LRU capacity of the query cache
    pub cache_capacity: usize,
    /// Put a failed chunk back into the pending sets.
    ///
    /// Ids that were re-enqueued while the chunk was in flight keep their
    /// newer pending mutation.
    pub requeue_failed: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            commit_mode: CommitMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            requeue_failed: false,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self.normalized()
    }

    pub fn with_requeue_failed(mut self, requeue: bool) -> Self {
        self.requeue_failed = requeue;
        self
    }

    /// Clamp sizes to usable values
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self.cache_capacity = self.cache_capacity.max(1);
        self
    }
}
