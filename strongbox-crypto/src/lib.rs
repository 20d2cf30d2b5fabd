//! Cryptographic layer for Strongbox.
//!
//! Provides:
//! - Argon2id key derivation from a PIN
//! - ChaCha20-Poly1305 authenticated encryption
//! - Zeroizing key material
//! - HMAC-SHA256 integrity tags over decrypted payloads
//!
//! # Key hierarchy
//!
//! 1. **Master Key**: derived from the user's PIN and a per-user salt at
//!    setup time. It encrypts every record payload and exists only in
//!    memory while the vault is unlocked.
//!
//! 2. **PIN Credential**: the master key re-encrypted under a second,
//!    independently salted PIN-derived key. Knowing the PIN plus the salt
//!    recovers the master key.
//!
//! 3. **Wrapped Master Key**: the master key encrypted under a device-bound
//!    wrapping key, so a biometric unlock can recover it without the PIN.
//!
//! The two recovery paths never learn about each other: revoking the
//! wrapped key on one device does not touch the PIN credential.

mod cipher;
mod error;
pub mod integrity;
mod key;
pub mod pin;
pub mod token;
pub mod wrap;

pub use cipher::{EncryptedData, NONCE_SIZE, TAG_SIZE, decrypt, encrypt};
pub use error::{CryptoError, CryptoResult};
pub use integrity::{IntegrityChecker, RecordContext};
pub use key::{
    DerivedKey, KEY_SIZE, KdfParams, SALT_SIZE, Salt, derive_key, generate_random_key,
};
pub use pin::{PinCredential, create_pin_credential, open_pin_credential};
pub use token::{hashed_random_token, random_bytes};
pub use wrap::{WrappedMasterKey, unwrap_master_key, wrap_master_key};
