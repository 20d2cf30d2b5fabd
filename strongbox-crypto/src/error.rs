//! Crypto error types.

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("integrity check failed for {0}")]
    IntegrityMismatch(String),

    #[error("integrity checker not initialized")]
    IntegrityUnavailable,

    #[error("malformed key material: {0}")]
    Malformed(String),
}
