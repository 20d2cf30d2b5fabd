//! PIN-based recovery of the master key.
//!
//! A [`PinCredential`] bundles the PIN salt with the master key encrypted
//! under the PIN-derived key, so the PIN is the only other input needed
//! to recover it. The credential is safe to persist and to hand to the
//! server: without the PIN it is an Argon2id-hardened ciphertext.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KdfParams, Salt, derive_key};
use crate::{EncryptedData, decrypt, encrypt};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    pub pin_salt: Salt,
    /// Base64 of the master key, encrypted under the PIN-derived key.
    pub encrypted_pin_key: EncryptedData,
    /// KDF cost used for this credential, so later parameter changes do
    /// not lock existing users out.
    pub kdf: KdfParams,
}

/// Encrypts `master_key` under a key derived from `pin` and a fresh salt.
pub fn create_pin_credential(
    master_key: &DerivedKey,
    pin: &str,
    params: &KdfParams,
) -> CryptoResult<PinCredential> {
    let pin_salt = Salt::random();
    let pin_key = derive_key(pin, &pin_salt, params)?;

    let encoded = Zeroizing::new(STANDARD.encode(master_key.as_bytes()));
    let encrypted_pin_key = encrypt(&pin_key, encoded.as_bytes())?;

    Ok(PinCredential {
        pin_salt,
        encrypted_pin_key,
        kdf: *params,
    })
}

/// Recovers the master key from a credential. A wrong PIN surfaces as
/// [`CryptoError::Decryption`].
pub fn open_pin_credential(credential: &PinCredential, pin: &str) -> CryptoResult<DerivedKey> {
    let pin_key = derive_key(pin, &credential.pin_salt, &credential.kdf)?;
    let encoded = Zeroizing::new(decrypt(&pin_key, &credential.encrypted_pin_key)?);

    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded.as_slice())
            .map_err(|e| CryptoError::Malformed(format!("pin key encoding: {e}")))?,
    );
    DerivedKey::from_slice(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn round_trip() {
        let master = generate_random_key();
        let cred = create_pin_credential(&master, "482913", &KdfParams::minimal()).unwrap();
        let recovered = open_pin_credential(&cred, "482913").unwrap();
        assert_eq!(master.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn wrong_pin_is_decryption_error() {
        let master = generate_random_key();
        let cred = create_pin_credential(&master, "482913", &KdfParams::minimal()).unwrap();
        let err = open_pin_credential(&cred, "482914").unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[test]
    fn each_credential_uses_a_fresh_salt() {
        let master = generate_random_key();
        let a = create_pin_credential(&master, "482913", &KdfParams::minimal()).unwrap();
        let b = create_pin_credential(&master, "482913", &KdfParams::minimal()).unwrap();
        assert_ne!(a.pin_salt, b.pin_salt);
        assert_ne!(a.encrypted_pin_key, b.encrypted_pin_key);
    }

    #[test]
    fn survives_json_persistence() {
        let master = generate_random_key();
        let cred = create_pin_credential(&master, "0000", &KdfParams::minimal()).unwrap();
        let json = serde_json::to_vec(&cred).unwrap();
        let back: PinCredential = serde_json::from_slice(&json).unwrap();
        let recovered = open_pin_credential(&back, "0000").unwrap();
        assert_eq!(master.as_bytes(), recovered.as_bytes());
    }
}
