// vellum-core/src/error.rs
// Error taxonomy shared by every storage backend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VellumError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Insert with an id already present. Nothing was changed.
    #[error("Document '{id}' already exists in collection '{collection}'")]
    DuplicateDocument { collection: String, id: String },

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    /// The durable backend has not finished hydrating this collection yet.
    #[error("Backend for collection '{0}' is not ready")]
    BackendUnavailable(String),

    /// A drain chunk could not be committed. Items of that chunk were already
    /// dequeued and are only retried when `requeue_failed` is enabled.
    #[error("Commit failed for collection '{collection}': {reason}")]
    CommitFailure { collection: String, reason: String },

    #[error("Data corruption: {0}")]
    Corruption(String),
}

impl From<serde_json::Error> for VellumError {
    fn from(err: serde_json::Error) -> Self {
        VellumError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VellumError>;
