//! Remote store abstraction.
//!
//! The remote only ever sees [`EncryptedRecord`]s: ciphertext plus the
//! cleartext metadata needed for indexing. Every write carries the
//! client-chosen entity id, so redelivering the same entry cannot create a
//! second entity.

use async_trait::async_trait;
use strongbox_types::{EncryptedRecord, EntityType};
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure, timeout, throttling, or a server-side error.
    #[error("remote unavailable: {0}")]
    Transient(String),

    /// The remote refused the request and will keep refusing it.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("entity not found on remote")]
    NotFound,

    #[error("entity already exists on remote")]
    AlreadyExists,

    #[error("remote session not authorized")]
    Unauthorized,

    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("remote client setup failed: {0}")]
    Client(String),
}

impl RemoteError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient(_) | RemoteError::Unauthorized | RemoteError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Transient(e.to_string())
    }
}

/// Authenticated request/response channel to the backend.
///
/// `token` is the caller's copy of the current session token; the remote
/// never needs the master key.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord>;

    async fn update(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord>;

    async fn delete(&self, token: &str, entity_type: EntityType, id: &str) -> RemoteResult<()>;

    /// Every record of `entity_type`, tombstones included.
    async fn fetch_all(&self, token: &str, entity_type: EntityType) -> RemoteResult<Vec<EncryptedRecord>>;
}
