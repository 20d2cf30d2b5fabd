//! Encryption boundary between entities and records.
//!
//! Sealing serializes an entity's sensitive fields, tags the plaintext with
//! the session's integrity key, and encrypts it under the master key.
//! Opening reverses that and then validates the payload against the
//! record's cleartext type tag. Anything that fails along the way is an
//! [`SyncError::IntegrityViolation`]: the record is untrusted.

use crate::error::{SyncError, SyncResult};
use strongbox_crypto::{
    CryptoError, DerivedKey, EncryptedData, IntegrityChecker, RecordContext, decrypt, encrypt,
};
use strongbox_types::{EncryptedRecord, Entity};
use zeroize::Zeroizing;

/// Borrows the session's key material for the duration of one operation.
pub struct RecordCodec<'a> {
    key: &'a DerivedKey,
    integrity: &'a IntegrityChecker,
    user_id: &'a str,
}

impl<'a> RecordCodec<'a> {
    pub fn new(key: &'a DerivedKey, integrity: &'a IntegrityChecker, user_id: &'a str) -> Self {
        Self {
            key,
            integrity,
            user_id,
        }
    }

    pub fn seal(&self, entity: &Entity) -> SyncResult<EncryptedRecord> {
        let plaintext = Zeroizing::new(entity.sealed_json()?);
        let entity_type = entity.entity_type();
        let ctx = RecordContext {
            user_id: self.user_id,
            entity_type: entity_type.as_str(),
            entity_id: entity.id(),
            type_tag: entity.type_tag(),
            vault_id: entity.vault_id(),
            category_id: entity.category_id(),
        };
        let integrity_tag = self.integrity.tag(&ctx, &plaintext)?;
        let ciphertext = encrypt(self.key, &plaintext)?.to_bytes()?;

        Ok(EncryptedRecord {
            id: entity.id().to_string(),
            entity_type,
            type_tag: entity.type_tag().to_string(),
            vault_id: entity.vault_id().map(str::to_string),
            category_id: entity.category_id().map(str::to_string),
            ciphertext,
            integrity_tag,
            created_at: entity.created_at(),
            updated_at: entity.updated_at(),
            deleted_at: entity.deleted_at(),
        })
    }

    pub fn open(&self, record: &EncryptedRecord) -> SyncResult<Entity> {
        let violation = |reason: String| SyncError::IntegrityViolation {
            entity_type: record.entity_type,
            entity_id: record.id.clone(),
            reason,
        };

        let sealed = EncryptedData::from_bytes(&record.ciphertext)
            .map_err(|e| violation(format!("unreadable ciphertext: {e}")))?;
        let plaintext = Zeroizing::new(decrypt(self.key, &sealed).map_err(|e| match e {
            CryptoError::Decryption(_) => violation("ciphertext failed authentication".into()),
            other => SyncError::Crypto(other),
        })?);

        let ctx = RecordContext {
            user_id: self.user_id,
            entity_type: record.entity_type.as_str(),
            entity_id: &record.id,
            type_tag: &record.type_tag,
            vault_id: record.vault_id.as_deref(),
            category_id: record.category_id.as_deref(),
        };
        self.integrity
            .verify(&ctx, &plaintext, &record.integrity_tag)
            .map_err(|e| match e {
                CryptoError::IntegrityMismatch(_) => violation("integrity tag mismatch".into()),
                other => SyncError::Crypto(other),
            })?;

        Entity::open(record, &plaintext).map_err(|e| violation(format!("schema: {e}")))
    }
}
