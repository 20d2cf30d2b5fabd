//! Master key lifecycle.
//!
//! The [`KeyLifecycleManager`] is the only owner of the master key. It
//! derives it at setup, recovers it through either the PIN credential or
//! the device-wrapped copy, lends it out by reference for the length of a
//! synchronous closure ([`with_key`](KeyLifecycleManager::with_key)), and
//! zeroizes it on lock.
//!
//! Unlocks are guarded against re-entrancy: a second unlock while one is
//! running fails fast with [`VaultError::UnlockInProgress`]. A `lock()`
//! that lands mid-unlock bumps the lock generation, and the finishing
//! unlock drops its freshly derived key instead of installing it.

use crate::error::{VaultError, VaultResult};
use crate::platform::{BiometricPrompt, DeviceKeyStore};
use crate::rate_limit::RateLimiter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use strongbox_crypto::{
    CryptoError, DerivedKey, IntegrityChecker, KdfParams, PinCredential, Salt, WrappedMasterKey,
    create_pin_credential, derive_key, open_pin_credential, unwrap_master_key, wrap_master_key,
};
use strongbox_storage::{MetaKey, UserCache};
use strongbox_types::{ActivityAction, ActivityEntry, Clock, UnlockMethod};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Shortest PIN accepted at setup or change.
pub const MIN_PIN_LENGTH: usize = 4;

/// What setup persisted.
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub pin_credential: PinCredential,
    /// `None` when the device has no secure key storage.
    pub wrapped_master_key: Option<WrappedMasterKey>,
}

struct Unlocked {
    master: DerivedKey,
    integrity: IntegrityChecker,
}

/// Clears the in-progress flag when an unlock finishes, however it ends.
struct UnlockGuard<'a>(&'a AtomicBool);

impl<'a> UnlockGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> VaultResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| VaultError::UnlockInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct KeyLifecycleManager {
    cache: UserCache,
    device_keys: Arc<dyn DeviceKeyStore>,
    biometric: Arc<dyn BiometricPrompt>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    kdf: KdfParams,
    device_id: String,
    slot: RwLock<Option<Unlocked>>,
    generation: AtomicU64,
    unlocking: AtomicBool,
}

impl KeyLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: UserCache,
        device_keys: Arc<dyn DeviceKeyStore>,
        biometric: Arc<dyn BiometricPrompt>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        kdf: KdfParams,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            device_keys,
            biometric,
            limiter,
            clock,
            kdf,
            device_id: device_id.into(),
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            unlocking: AtomicBool::new(false),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn is_initialized(&self) -> VaultResult<bool> {
        Ok(self.cache.get_meta(MetaKey::PinCredential)?.is_some())
    }

    pub fn is_unlocked(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn has_wrapped_key(&self) -> VaultResult<bool> {
        Ok(self.cache.get_meta(MetaKey::WrappedMasterKey)?.is_some())
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Derives the master key from `pin`, persists the PIN credential and
    /// (when the device supports it) the wrapped key, and leaves the vault
    /// unlocked.
    pub async fn setup_master_pin(&self, pin: &str) -> VaultResult<SetupOutcome> {
        check_pin(pin)?;
        if self.is_initialized()? {
            return Err(VaultError::AlreadyInitialized);
        }
        let _guard = UnlockGuard::acquire(&self.unlocking)?;
        let generation = self.generation.load(Ordering::Acquire);

        let salt = self.master_salt()?;
        let pin = Zeroizing::new(pin.to_string());
        let kdf = self.kdf;
        let (master, pin_credential) = tokio::task::spawn_blocking(move || {
            let master = derive_key(&pin, &salt, &kdf)?;
            let credential = create_pin_credential(&master, &pin, &kdf)?;
            Ok::<_, CryptoError>((master, credential))
        })
        .await
        .map_err(|e| VaultError::KeyDerivation(format!("kdf task failed: {e}")))?
        .map_err(kdf_error)?;

        let wrapped_master_key = self.wrap_for_device(&master).await?;
        self.cache
            .put_meta_json(MetaKey::PinCredential, &pin_credential)?;
        if let Some(wrapped) = &wrapped_master_key {
            self.cache.put_meta_json(MetaKey::WrappedMasterKey, wrapped)?;
        }

        self.install(generation, master)?;
        self.log(ActivityAction::VaultSetup, None);
        info!(user_id = %self.cache.user_id(), biometric = wrapped_master_key.is_some(), "vault set up");
        Ok(SetupOutcome {
            pin_credential,
            wrapped_master_key,
        })
    }

    fn master_salt(&self) -> VaultResult<Salt> {
        if let Some(salt) = self.cache.get_meta_json::<Salt>(MetaKey::MasterSalt)? {
            return Ok(salt);
        }
        let salt = Salt::random();
        self.cache.put_meta_json(MetaKey::MasterSalt, &salt)?;
        Ok(salt)
    }

    async fn wrap_for_device(&self, master: &DerivedKey) -> VaultResult<Option<WrappedMasterKey>> {
        let device_key = match self.device_keys.wrapping_key().await {
            Ok(Some(key)) => key,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("device key store unavailable, biometric unlock disabled: {e}");
                return Ok(None);
            }
        };
        let wrapped = wrap_master_key(master, &device_key.key, &device_key.id)
            .map_err(|e| VaultError::Wrap(e.to_string()))?;
        Ok(Some(wrapped))
    }

    // ========================================================================
    // Unlock
    // ========================================================================

    /// Recovers the master key from the persisted PIN credential.
    ///
    /// Consults the rate limiter first and returns its rejection as is. A
    /// wrong PIN counts as a failed attempt; success resets the counter.
    pub async fn unlock_with_pin(&self, pin: &str) -> VaultResult<()> {
        let credential = self.pin_credential()?;
        self.limiter.check()?;
        let _guard = UnlockGuard::acquire(&self.unlocking)?;
        let generation = self.generation.load(Ordering::Acquire);

        let master = match self.open_credential(credential, pin).await {
            Ok(master) => master,
            Err(VaultError::InvalidCredential) => {
                let state = self.limiter.record_failed_attempt()?;
                self.log(ActivityAction::UnlockFailed, Some(UnlockMethod::Pin.as_str()));
                warn!(failed_attempts = state.failed_attempts, "PIN unlock failed");
                return Err(VaultError::InvalidCredential);
            }
            Err(e) => return Err(e),
        };

        self.limiter.record_successful_attempt()?;
        self.install(generation, master)?;
        self.log(ActivityAction::Unlock, Some(UnlockMethod::Pin.as_str()));
        info!(user_id = %self.cache.user_id(), "unlocked with PIN");
        Ok(())
    }

    /// Recovers the master key from the device-wrapped copy after a
    /// biometric check. If the wrapped key cannot be opened it is
    /// discarded and the caller must fall back to PIN unlock.
    pub async fn unlock_with_biometric(&self) -> VaultResult<()> {
        let wrapped: WrappedMasterKey = self
            .cache
            .get_meta_json(MetaKey::WrappedMasterKey)?
            .ok_or_else(|| VaultError::Wrap("biometric unlock is not enabled".into()))?;
        let _guard = UnlockGuard::acquire(&self.unlocking)?;
        let generation = self.generation.load(Ordering::Acquire);

        match self.biometric.authenticate("Unlock your vault").await {
            Ok(true) => {}
            Ok(false) => {
                self.log(ActivityAction::UnlockFailed, Some(UnlockMethod::Biometric.as_str()));
                return Err(VaultError::BiometricAuth("declined".into()));
            }
            Err(e) => {
                self.log(ActivityAction::UnlockFailed, Some(UnlockMethod::Biometric.as_str()));
                return Err(VaultError::BiometricAuth(e.to_string()));
            }
        }

        let device_key = match self.device_keys.load(&wrapped.wrapping_key_id).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                return Err(self
                    .discard_broken_wrap(&wrapped, "device wrapping key is gone")
                    .await);
            }
            Err(e) => {
                return Err(self.discard_broken_wrap(&wrapped, &e.to_string()).await);
            }
        };
        let master = match unwrap_master_key(&wrapped, &device_key) {
            Ok(master) => master,
            Err(e) => return Err(self.discard_broken_wrap(&wrapped, &e.to_string()).await),
        };

        self.limiter.record_successful_attempt()?;
        self.install(generation, master)?;
        self.log(ActivityAction::Unlock, Some(UnlockMethod::Biometric.as_str()));
        info!(user_id = %self.cache.user_id(), "unlocked with biometrics");
        Ok(())
    }

    async fn discard_broken_wrap(&self, wrapped: &WrappedMasterKey, reason: &str) -> VaultError {
        warn!(key_id = %wrapped.wrapping_key_id, "discarding unusable wrapped key: {reason}");
        if let Err(e) = self.cache.delete_meta(MetaKey::WrappedMasterKey) {
            return e.into();
        }
        if let Err(e) = self.device_keys.delete(&wrapped.wrapping_key_id).await {
            debug!("device key cleanup failed: {e}");
        }
        self.log(ActivityAction::UnlockFailed, Some(UnlockMethod::Biometric.as_str()));
        VaultError::Wrap(reason.to_string())
    }

    fn pin_credential(&self) -> VaultResult<PinCredential> {
        self.cache
            .get_meta_json(MetaKey::PinCredential)?
            .ok_or(VaultError::NotInitialized)
    }

    async fn open_credential(&self, credential: PinCredential, pin: &str) -> VaultResult<DerivedKey> {
        let pin = Zeroizing::new(pin.to_string());
        tokio::task::spawn_blocking(move || open_pin_credential(&credential, &pin))
            .await
            .map_err(|e| VaultError::KeyDerivation(format!("kdf task failed: {e}")))?
            .map_err(kdf_error)
    }

    /// Installs a recovered key unless a lock landed since `generation`.
    fn install(&self, generation: u64, master: DerivedKey) -> VaultResult<()> {
        let mut integrity = IntegrityChecker::new();
        integrity.initialize(&master)?;

        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::Acquire) != generation {
            // `master` and `integrity` zeroize on drop
            info!("lock requested during unlock, discarding derived key");
            return Err(VaultError::UnlockAborted);
        }
        *slot = Some(Unlocked { master, integrity });
        Ok(())
    }

    // ========================================================================
    // Use and lock
    // ========================================================================

    /// Lends the master key and integrity checker to `f`. The borrow ends
    /// with the closure, so callers cannot hold key material across an
    /// await.
    pub fn with_key<R>(
        &self,
        f: impl FnOnce(&DerivedKey, &IntegrityChecker) -> VaultResult<R>,
    ) -> VaultResult<R> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        let unlocked = slot.as_ref().ok_or(VaultError::NotUnlocked)?;
        f(&unlocked.master, &unlocked.integrity)
    }

    /// Zeroizes the master key and integrity state. Idempotent; also
    /// aborts any unlock still deriving keys. Returns whether a key was
    /// held.
    pub fn lock(&self) -> bool {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let taken = self
            .slot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let was_unlocked = match taken {
            Some(mut unlocked) => {
                unlocked.integrity.clear();
                // DerivedKey zeroizes on drop
                drop(unlocked);
                true
            }
            None => false,
        };
        if was_unlocked {
            self.log(ActivityAction::Lock, None);
        }
        info!(user_id = %self.cache.user_id(), was_unlocked, "vault locked");
        was_unlocked
    }

    // ========================================================================
    // Credential maintenance
    // ========================================================================

    /// Re-issues the PIN credential for the same master key. The old PIN
    /// is verified and rate-limited exactly like an unlock; records do not
    /// need re-encryption.
    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> VaultResult<()> {
        check_pin(new_pin)?;
        let credential = self.pin_credential()?;
        self.limiter.check()?;

        let master = match self.open_credential(credential, old_pin).await {
            Ok(master) => master,
            Err(VaultError::InvalidCredential) => {
                self.limiter.record_failed_attempt()?;
                self.log(ActivityAction::UnlockFailed, Some("pin change"));
                return Err(VaultError::InvalidCredential);
            }
            Err(e) => return Err(e),
        };
        self.limiter.record_successful_attempt()?;

        let new_pin = Zeroizing::new(new_pin.to_string());
        let kdf = self.kdf;
        let credential = tokio::task::spawn_blocking(move || {
            create_pin_credential(&master, &new_pin, &kdf)
        })
        .await
        .map_err(|e| VaultError::KeyDerivation(format!("kdf task failed: {e}")))?
        .map_err(kdf_error)?;

        self.cache.put_meta_json(MetaKey::PinCredential, &credential)?;
        self.log(ActivityAction::PinChanged, None);
        info!(user_id = %self.cache.user_id(), "PIN changed");
        Ok(())
    }

    /// Wraps the currently held key for this device, replacing any
    /// previous wrapped copy.
    pub async fn enable_biometric(&self) -> VaultResult<WrappedMasterKey> {
        let device_key = match self.device_keys.wrapping_key().await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(VaultError::Wrap("no device key storage".into())),
            Err(e) => return Err(VaultError::Wrap(e.to_string())),
        };
        let wrapped = self.with_key(|master, _| {
            wrap_master_key(master, &device_key.key, &device_key.id)
                .map_err(|e| VaultError::Wrap(e.to_string()))
        })?;
        self.cache.put_meta_json(MetaKey::WrappedMasterKey, &wrapped)?;
        info!(key_id = %wrapped.wrapping_key_id, "biometric unlock enabled");
        Ok(wrapped)
    }

    /// Forgets the wrapped key and its device wrapping key. The PIN path is
    /// untouched.
    pub async fn discard_wrapped_key(&self) -> VaultResult<()> {
        let wrapped: Option<WrappedMasterKey> = self.cache.get_meta_json(MetaKey::WrappedMasterKey)?;
        self.cache.delete_meta(MetaKey::WrappedMasterKey)?;
        if let Some(wrapped) = wrapped
            && let Err(e) = self.device_keys.delete(&wrapped.wrapping_key_id).await
        {
            warn!("device key cleanup failed: {e}");
        }
        Ok(())
    }

    fn log(&self, action: ActivityAction, detail: Option<&str>) {
        let mut entry = ActivityEntry::new(action, &self.device_id, self.clock.now_millis());
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        if let Err(e) = self.cache.append_activity(&entry) {
            warn!(action = action.as_str(), "could not record activity: {e}");
        }
    }
}

fn check_pin(pin: &str) -> VaultResult<()> {
    if pin.chars().count() < MIN_PIN_LENGTH {
        return Err(VaultError::PinTooShort {
            min: MIN_PIN_LENGTH,
        });
    }
    Ok(())
}

/// A failed AEAD open on the PIN credential means the PIN was wrong.
fn kdf_error(e: CryptoError) -> VaultError {
    match e {
        CryptoError::Decryption(_) => VaultError::InvalidCredential,
        other => VaultError::KeyDerivation(other.to_string()),
    }
}
