//! Platform collaborators: biometric prompt and device-bound key storage.
//!
//! Real implementations live in the host app (Keychain, Android
//! Keystore, TPM). [`EphemeralDeviceKeyStore`] keeps the wrapping key in
//! process memory and suits desktop development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use strongbox_crypto::{DerivedKey, generate_random_key};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("platform facility unavailable: {0}")]
    Unavailable(String),

    #[error("platform call failed: {0}")]
    Failed(String),
}

/// Asks the user to authenticate with a biometric factor.
#[async_trait]
pub trait BiometricPrompt: Send + Sync {
    /// `Ok(false)` means the user declined or failed the check.
    async fn authenticate(&self, reason: &str) -> Result<bool, PlatformError>;
}

/// A device wrapping key handed out by the platform.
pub struct DeviceKey {
    pub id: String,
    pub key: DerivedKey,
}

/// Non-exportable, device-bound key storage.
#[async_trait]
pub trait DeviceKeyStore: Send + Sync {
    /// Returns the current wrapping key, creating one on first use.
    /// `None` when the device has no secure key storage.
    async fn wrapping_key(&self) -> Result<Option<DeviceKey>, PlatformError>;

    /// Loads a wrapping key by id. `None` if it was rotated away or lost.
    async fn load(&self, key_id: &str) -> Result<Option<DerivedKey>, PlatformError>;

    async fn delete(&self, key_id: &str) -> Result<(), PlatformError>;
}

/// Process-local key store. Keys vanish with the process.
#[derive(Default)]
pub struct EphemeralDeviceKeyStore {
    keys: Mutex<HashMap<String, [u8; 32]>>,
    current: Mutex<Option<String>>,
}

impl EphemeralDeviceKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every key, as if the platform keystore had been reset.
    pub fn reset(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *current = None;
    }
}

impl Drop for EphemeralDeviceKeyStore {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        let keys = self.keys.get_mut().unwrap_or_else(|e| e.into_inner());
        for key in keys.values_mut() {
            key.zeroize();
        }
    }
}

#[async_trait]
impl DeviceKeyStore for EphemeralDeviceKeyStore {
    async fn wrapping_key(&self) -> Result<Option<DeviceKey>, PlatformError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = current.as_ref()
            && let Some(bytes) = keys.get(id)
        {
            return Ok(Some(DeviceKey {
                id: id.clone(),
                key: DerivedKey::from_bytes(*bytes),
            }));
        }
        let id = format!("device-key-{}", uuid::Uuid::new_v4());
        let key = generate_random_key();
        keys.insert(id.clone(), *key.as_bytes());
        *current = Some(id.clone());
        Ok(Some(DeviceKey { id, key }))
    }

    async fn load(&self, key_id: &str) -> Result<Option<DerivedKey>, PlatformError> {
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Ok(keys.get(key_id).map(|bytes| DerivedKey::from_bytes(*bytes)))
    }

    async fn delete(&self, key_id: &str) -> Result<(), PlatformError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut bytes) = keys.remove(key_id) {
            use zeroize::Zeroize;
            bytes.zeroize();
        }
        if current.as_deref() == Some(key_id) {
            *current = None;
        }
        Ok(())
    }
}

/// A device without secure key storage. Biometric unlock is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeviceKeyStore;

#[async_trait]
impl DeviceKeyStore for NoDeviceKeyStore {
    async fn wrapping_key(&self) -> Result<Option<DeviceKey>, PlatformError> {
        Ok(None)
    }

    async fn load(&self, _key_id: &str) -> Result<Option<DerivedKey>, PlatformError> {
        Ok(None)
    }

    async fn delete(&self, _key_id: &str) -> Result<(), PlatformError> {
        Ok(())
    }
}
