//! Shared helpers for vault service tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use strongbox_crypto::KdfParams;
use strongbox_storage::LocalCache;
use strongbox_sync::{InMemoryRemote, SyncConfig};
use strongbox_types::{Clock, Item, ItemPayload, ManualClock, Vault};
use strongbox_vault::{
    BiometricPrompt, DeviceProfile, EphemeralDeviceKeyStore, MutationOutcome, Platform,
    PlatformError, VaultConfig, VaultService,
};
use tokio::sync::Notify;

pub const USER_ID: &str = "user-1";
pub const PIN: &str = "482913";

// ── Biometric prompt doubles ──

pub struct ApprovingPrompt;

#[async_trait]
impl BiometricPrompt for ApprovingPrompt {
    async fn authenticate(&self, _reason: &str) -> Result<bool, PlatformError> {
        Ok(true)
    }
}

pub struct DecliningPrompt;

#[async_trait]
impl BiometricPrompt for DecliningPrompt {
    async fn authenticate(&self, _reason: &str) -> Result<bool, PlatformError> {
        Ok(false)
    }
}

/// Approves, but only once released. Signals `entered` when the prompt is
/// showing so a test can act while the unlock is suspended.
#[derive(Default)]
pub struct GatedPrompt {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl BiometricPrompt for GatedPrompt {
    async fn authenticate(&self, _reason: &str) -> Result<bool, PlatformError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(true)
    }
}

// ── Service harness ──

pub fn config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams::minimal(),
        sync: SyncConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
        },
        ..VaultConfig::default()
    }
}

/// A service over an in-memory remote with a hand-driven clock.
pub struct TestVault {
    pub clock: Arc<ManualClock>,
    pub remote: Arc<InMemoryRemote>,
    pub device_keys: Arc<EphemeralDeviceKeyStore>,
    pub prompt: Arc<dyn BiometricPrompt>,
    pub cache: LocalCache,
    pub service: VaultService,
}

impl TestVault {
    pub fn new() -> Self {
        Self::with_prompt(Arc::new(ApprovingPrompt))
    }

    pub fn with_prompt(prompt: Arc<dyn BiometricPrompt>) -> Self {
        let cache = LocalCache::open_in_memory().expect("open cache");
        Self::over(cache, prompt)
    }

    pub fn at_path(path: &Path) -> Self {
        let cache = LocalCache::open(path).expect("open cache");
        Self::over(cache, Arc::new(ApprovingPrompt))
    }

    fn over(cache: LocalCache, prompt: Arc<dyn BiometricPrompt>) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let remote = Arc::new(InMemoryRemote::with_clock(clock.clone() as Arc<dyn Clock>));
        let device_keys = Arc::new(EphemeralDeviceKeyStore::new());
        let service = open_service(&cache, USER_ID, &clock, &remote, &device_keys, &prompt);
        Self {
            clock,
            remote,
            device_keys,
            prompt,
            cache,
            service,
        }
    }

    /// Set up with [`PIN`] and unlocked.
    pub async fn unlocked() -> Self {
        let tv = Self::new();
        tv.service.setup_master_pin(PIN).await.expect("setup");
        tv
    }

    /// A second service over the same cache and remote, as after a restart.
    pub fn reopen(&self, user_id: &str) -> VaultService {
        open_service(
            &self.cache,
            user_id,
            &self.clock,
            &self.remote,
            &self.device_keys,
            &self.prompt,
        )
    }

    /// Creates a vault and returns its id.
    pub async fn vault(&self, name: &str) -> String {
        let outcome = self
            .service
            .create_vault(Vault::new(name))
            .await
            .expect("create vault");
        outcome.entity.id().to_string()
    }

    pub async fn create_login(&self, vault_id: &str, name: &str) -> MutationOutcome {
        self.service
            .create_item(login(vault_id, name))
            .await
            .expect("create item")
    }
}

fn open_service(
    cache: &LocalCache,
    user_id: &str,
    clock: &Arc<ManualClock>,
    remote: &Arc<InMemoryRemote>,
    device_keys: &Arc<EphemeralDeviceKeyStore>,
    prompt: &Arc<dyn BiometricPrompt>,
) -> VaultService {
    let platform = Platform {
        device_keys: device_keys.clone(),
        biometric: prompt.clone(),
        device: DeviceProfile::new("Test phone", "ios"),
    };
    VaultService::open_with_clock(
        cache,
        user_id,
        remote.clone(),
        platform,
        config(),
        clock.clone(),
    )
    .expect("open service")
}

pub fn login(vault_id: &str, name: &str) -> Item {
    Item::new(
        vault_id,
        name,
        ItemPayload::Login {
            username: "ada@example.com".into(),
            password: "correct horse".into(),
            urls: vec!["https://example.com".into()],
            totp_secret: None,
        },
    )
}

pub fn note(vault_id: &str, name: &str, text: &str) -> Item {
    Item::new(vault_id, name, ItemPayload::SecureNote { text: text.into() })
}
