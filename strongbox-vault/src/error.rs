//! Error taxonomy exposed to the presentation layer.
//!
//! Nothing from a platform or library crosses this boundary untranslated.

use strongbox_crypto::CryptoError;
use strongbox_storage::StorageError;
use strongbox_sync::{RemoteError, SyncError};
use strongbox_types::EntityType;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Platform crypto failed; the operation can be retried.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Wrong PIN. The attempt was counted by the rate limiter.
    #[error("invalid credential")]
    InvalidCredential,

    #[error("biometric authentication failed: {0}")]
    BiometricAuth(String),

    /// The wrapped key could not be opened; it has been discarded and the
    /// caller must fall back to PIN unlock.
    #[error("wrapped key unusable: {0}")]
    Wrap(String),

    #[error("rate limit exceeded: {reason}")]
    RateLimitExceeded { remaining_secs: u64, reason: String },

    /// Local storage write failed. Any optimistic in-memory state survives
    /// and is flagged unsynced.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("integrity violation on {entity_type} {entity_id}: {reason}")]
    IntegrityViolation {
        entity_type: EntityType,
        entity_id: String,
        reason: String,
    },

    /// The remote refused a write. The entry is parked in the queue at
    /// `seq` when one was recorded.
    #[error("sync failed: {message}")]
    SyncConflictOrFailure { seq: Option<i64>, message: String },

    #[error("vault is locked")]
    NotUnlocked,

    #[error("vault not initialized")]
    NotInitialized,

    #[error("vault already initialized")]
    AlreadyInitialized,

    #[error("an unlock is already in progress")]
    UnlockInProgress,

    /// The vault was locked while this unlock was running.
    #[error("unlock aborted by lock")]
    UnlockAborted,

    #[error("PIN too short (min {min} characters)")]
    PinTooShort { min: usize },

    #[error("no active session")]
    NoSession,

    #[error("{entity_type} {entity_id} not found")]
    NotFound {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<StorageError> for VaultError {
    fn from(e: StorageError) -> Self {
        VaultError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Persistence(format!("serialization: {e}"))
    }
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::IntegrityUnavailable => VaultError::NotUnlocked,
            other => VaultError::KeyDerivation(other.to_string()),
        }
    }
}

impl From<SyncError> for VaultError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Storage(e) => e.into(),
            SyncError::Persistence { queued, source, .. } => VaultError::Persistence(if queued {
                format!("{source} (queued for sync)")
            } else {
                source.to_string()
            }),
            SyncError::Crypto(e) => e.into(),
            SyncError::Serialization(e) => e.into(),
            SyncError::IntegrityViolation {
                entity_type,
                entity_id,
                reason,
            } => VaultError::IntegrityViolation {
                entity_type,
                entity_id,
                reason,
            },
            SyncError::Rejected {
                entity_type,
                entity_id,
                seq,
                message,
            } => VaultError::SyncConflictOrFailure {
                seq: Some(seq),
                message: format!("{entity_type} {entity_id}: {message}"),
            },
            SyncError::NotFound {
                entity_type,
                entity_id,
            } => VaultError::NotFound {
                entity_type,
                entity_id,
            },
            SyncError::Remote(e) => e.into(),
        }
    }
}

impl From<RemoteError> for VaultError {
    fn from(e: RemoteError) -> Self {
        VaultError::SyncConflictOrFailure {
            seq: None,
            message: e.to_string(),
        }
    }
}
