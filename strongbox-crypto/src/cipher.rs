//! ChaCha20-Poly1305 authenticated encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts and authenticates `data`. Fails on wrong key or any tampering.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption("ciphertext shorter than tag".into()));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".into()))
}
