//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the local cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage connection lock poisoned")]
    Lock,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("record quota exceeded: {quota} records")]
    QuotaExceeded { quota: usize },

    #[error("invalid cache option: {0}")]
    InvalidOption(String),

    #[error("queue entry {0} not found")]
    QueueEntryNotFound(i64),
}
