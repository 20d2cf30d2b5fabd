//! Device-bound wrapping of the master key.
//!
//! The wrapping key itself lives in platform secure storage; this module
//! only defines the persisted format and the seal/open operations.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use crate::{EncryptedData, decrypt, encrypt};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Master key encrypted under a device wrapping key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedMasterKey {
    /// Identifier of the device wrapping key that sealed this blob.
    pub wrapping_key_id: String,
    pub encrypted_key: EncryptedData,
    /// Unix timestamp when this blob was created.
    pub created_at: i64,
}

pub fn wrap_master_key(
    master_key: &DerivedKey,
    wrapping_key: &DerivedKey,
    wrapping_key_id: &str,
) -> CryptoResult<WrappedMasterKey> {
    let encrypted_key = encrypt(wrapping_key, master_key.as_bytes())?;
    Ok(WrappedMasterKey {
        wrapping_key_id: wrapping_key_id.to_string(),
        encrypted_key,
        created_at: chrono::Utc::now().timestamp(),
    })
}

pub fn unwrap_master_key(
    wrapped: &WrappedMasterKey,
    wrapping_key: &DerivedKey,
) -> CryptoResult<DerivedKey> {
    let plaintext = Zeroizing::new(decrypt(wrapping_key, &wrapped.encrypted_key)?);
    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }
    DerivedKey::from_slice(&plaintext)
}
