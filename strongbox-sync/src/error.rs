//! Sync error types.

use crate::remote::RemoteError;
use strongbox_crypto::CryptoError;
use strongbox_storage::StorageError;
use strongbox_types::EntityType;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The mutation is applied in memory but could not be cached.
    /// `queued` reports whether a replay entry was still recorded.
    #[error("could not persist {entity_type} {entity_id}: {source}")]
    Persistence {
        entity_type: EntityType,
        entity_id: String,
        queued: bool,
        source: StorageError,
    },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("integrity violation on {entity_type} {entity_id}: {reason}")]
    IntegrityViolation {
        entity_type: EntityType,
        entity_id: String,
        reason: String,
    },

    /// The remote permanently refused the write; the entry is parked as
    /// failed at `seq`.
    #[error("remote rejected {entity_type} {entity_id}: {message}")]
    Rejected {
        entity_type: EntityType,
        entity_id: String,
        seq: i64,
        message: String,
    },

    #[error("{entity_type} {entity_id} not found")]
    NotFound {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}
