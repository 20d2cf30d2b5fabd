//! Per-user key/value store for credentials and settings.
//!
//! Values are opaque bytes; callers that persist structured data use the
//! JSON helpers. Nothing stored here is a plaintext secret: credentials
//! arrive already sealed.

use crate::cache::UserCache;
use crate::error::StorageResult;
use duckdb::params;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Well-known meta keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKey {
    /// Salt the master key was derived with.
    MasterSalt,
    WrappedMasterKey,
    PinCredential,
    DeviceId,
    /// Unix millis of the last user-facing operation.
    LastActivity,
    AutoLockMinutes,
    Session,
    RateLimit,
}

impl MetaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::MasterSalt => "master_salt",
            MetaKey::WrappedMasterKey => "wrapped_master_key",
            MetaKey::PinCredential => "pin_credential",
            MetaKey::DeviceId => "device_id",
            MetaKey::LastActivity => "last_activity",
            MetaKey::AutoLockMinutes => "auto_lock_minutes",
            MetaKey::Session => "session",
            MetaKey::RateLimit => "rate_limit",
        }
    }
}

impl UserCache {
    pub fn get_meta(&self, key: MetaKey) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT value FROM meta WHERE user_id = ? AND key = ?",
            params![self.user_id, key.as_str()],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put_meta(&self, key: MetaKey, value: &[u8]) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (user_id, key, value) VALUES (?, ?, ?)",
            params![self.user_id, key.as_str(), value],
        )?;
        Ok(())
    }

    /// Removes a key. Returns whether it existed.
    pub fn delete_meta(&self, key: MetaKey) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM meta WHERE user_id = ? AND key = ?",
            params![self.user_id, key.as_str()],
        )?;
        Ok(removed > 0)
    }

    pub fn get_meta_json<T: DeserializeOwned>(&self, key: MetaKey) -> StorageResult<Option<T>> {
        match self.get_meta(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_meta_json<T: Serialize>(&self, key: MetaKey, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put_meta(key, &bytes)
    }
}
