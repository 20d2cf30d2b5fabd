//! Keyed integrity tags over decrypted payloads.
//!
//! AEAD already rejects corrupted ciphertext. These tags additionally bind
//! each payload to the record it was written for: user, entity type, id,
//! type tag, and the cleartext parent references. A valid ciphertext
//! swapped in under another record id, or a record re-parented into a
//! foreign vault or category, is detected after decryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const INTEGRITY_DOMAIN: &[u8] = b"strongbox-integrity-v1";

/// Identifies the record a payload belongs to.
#[derive(Clone, Copy, Debug)]
pub struct RecordContext<'a> {
    pub user_id: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub type_tag: &'a str,
    pub vault_id: Option<&'a str>,
    pub category_id: Option<&'a str>,
}

/// Session-scoped tag scheme. Holds a subkey derived from the master key;
/// [`IntegrityChecker::clear`] discards it on lock.
#[derive(Default)]
pub struct IntegrityChecker {
    key: Option<Zeroizing<[u8; KEY_SIZE]>>,
}

impl IntegrityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the tag key for this session from the master key.
    pub fn initialize(&mut self, master_key: &DerivedKey) -> CryptoResult<()> {
        let mut mac = HmacSha256::new_from_slice(master_key.as_bytes())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        mac.update(INTEGRITY_DOMAIN);
        let mut subkey = Zeroizing::new([0u8; KEY_SIZE]);
        subkey.copy_from_slice(&mac.finalize().into_bytes());
        self.key = Some(subkey);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    pub fn clear(&mut self) {
        self.key = None;
    }

    /// Computes the hex-encoded tag for `payload` in `ctx`.
    pub fn tag(&self, ctx: &RecordContext<'_>, payload: &[u8]) -> CryptoResult<String> {
        let mac = self.mac_for(ctx, payload)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recomputes the tag and compares in constant time.
    pub fn verify(&self, ctx: &RecordContext<'_>, payload: &[u8], tag: &str) -> CryptoResult<()> {
        let expected = hex::decode(tag)
            .map_err(|_| CryptoError::IntegrityMismatch(ctx.entity_id.to_string()))?;
        self.mac_for(ctx, payload)?
            .verify_slice(&expected)
            .map_err(|_| CryptoError::IntegrityMismatch(ctx.entity_id.to_string()))
    }

    fn mac_for(&self, ctx: &RecordContext<'_>, payload: &[u8]) -> CryptoResult<HmacSha256> {
        let key = self.key.as_ref().ok_or(CryptoError::IntegrityUnavailable)?;
        let mut mac = HmacSha256::new_from_slice(key.as_slice())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        for field in [
            ctx.user_id.as_bytes(),
            ctx.entity_type.as_bytes(),
            ctx.entity_id.as_bytes(),
            ctx.type_tag.as_bytes(),
            payload,
        ] {
            // length prefix keeps field boundaries unambiguous
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }
        for parent in [ctx.vault_id, ctx.category_id] {
            match parent {
                Some(id) => {
                    mac.update(&[1]);
                    mac.update(&(id.len() as u64).to_be_bytes());
                    mac.update(id.as_bytes());
                }
                None => mac.update(&[0]),
            }
        }
        Ok(mac)
    }
}
