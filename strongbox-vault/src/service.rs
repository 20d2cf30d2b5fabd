//! The vault service facade.
//!
//! [`VaultService`] wires the key lifecycle, session tokens, rate limiter,
//! auto-lock and sync engine together for one user on one device. It is
//! the surface a presentation layer talks to: unlock and lock, CRUD over
//! items, vaults and categories, reads with integrity alerts, and the
//! housekeeping around the offline queue.
//!
//! Key material never leaves [`KeyLifecycleManager::with_key`]. Each
//! mutation takes the key only for the synchronous stage step and
//! releases it before the remote call.

use crate::autolock::AutoLock;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keys::{KeyLifecycleManager, SetupOutcome};
use crate::platform::{BiometricPrompt, DeviceKeyStore};
use crate::rate_limit::{AttemptDecision, RateLimiter};
use crate::session::{SessionInfo, SessionTokenManager};
use std::sync::Arc;
use strongbox_crypto::{DerivedKey, IntegrityChecker, WrappedMasterKey};
use strongbox_storage::{LocalCache, MetaKey, UserCache};
use strongbox_sync::{
    IntegrityAlert, Loaded, Mutation, MutationOutcome, RecordCodec, RemoteStore, ReplayReport,
    Staged, SyncEngine,
};
use strongbox_types::{
    ActivityAction, ActivityEntry, Category, Clock, DeviceInfo, Entity, EntityType, Item,
    RecordFilter, SyncQueueEntry, SystemClock, Vault,
};
use tracing::{debug, info, warn};

/// How this device describes itself in the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub platform: String,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::new("This device", std::env::consts::OS)
    }
}

/// Host-provided facilities.
#[derive(Clone)]
pub struct Platform {
    pub device_keys: Arc<dyn DeviceKeyStore>,
    pub biometric: Arc<dyn BiometricPrompt>,
    pub device: DeviceProfile,
}

/// A read result: live entities, newest first, plus alerts for anything
/// that failed verification and was withheld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    pub entries: Vec<T>,
    pub alerts: Vec<IntegrityAlert>,
}

impl<T> Listing<T> {
    pub fn is_trusted(&self) -> bool {
        self.alerts.is_empty()
    }
}

pub struct VaultService {
    user_id: String,
    device_id: String,
    device: DeviceProfile,
    cache: UserCache,
    clock: Arc<dyn Clock>,
    keys: KeyLifecycleManager,
    sessions: SessionTokenManager,
    autolock: AutoLock,
    engine: SyncEngine,
}

impl VaultService {
    pub fn open(
        cache: &LocalCache,
        user_id: &str,
        remote: Arc<dyn RemoteStore>,
        platform: Platform,
        config: VaultConfig,
    ) -> VaultResult<Self> {
        Self::open_with_clock(cache, user_id, remote, platform, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        cache: &LocalCache,
        user_id: &str,
        remote: Arc<dyn RemoteStore>,
        platform: Platform,
        config: VaultConfig,
        clock: Arc<dyn Clock>,
    ) -> VaultResult<Self> {
        config.validate()?;
        if user_id.is_empty() {
            return Err(VaultError::Config("user id is empty".into()));
        }
        let cache = cache.for_user(user_id);
        let device_id = load_or_create_device_id(&cache)?;

        let limiter = RateLimiter::new(cache.clone(), clock.clone(), config.rate_limit.clone());
        let keys = KeyLifecycleManager::new(
            cache.clone(),
            platform.device_keys,
            platform.biometric,
            limiter,
            clock.clone(),
            config.kdf,
            device_id.clone(),
        );
        let sessions =
            SessionTokenManager::new(cache.clone(), clock.clone(), config.session.clone());
        // a session never outlives the process that unlocked
        sessions.invalidate_session()?;
        let autolock = AutoLock::new(cache.clone(), clock.clone(), config.default_auto_lock_minutes());
        let engine = SyncEngine::new(
            cache.clone(),
            remote,
            clock.clone(),
            config.sync.clone(),
            device_id.clone(),
        );

        debug!(user_id, device_id = %device_id, "vault service opened");
        Ok(Self {
            user_id: user_id.to_string(),
            device_id,
            device: platform.device,
            cache,
            clock,
            keys,
            sessions,
            autolock,
            engine,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_initialized(&self) -> VaultResult<bool> {
        self.keys.is_initialized()
    }

    pub fn is_unlocked(&self) -> bool {
        self.keys.is_unlocked()
    }

    pub fn has_biometric_unlock(&self) -> VaultResult<bool> {
        self.keys.has_wrapped_key()
    }

    // ========================================================================
    // Key lifecycle
    // ========================================================================

    /// First-run setup. Leaves the vault unlocked with a fresh session.
    pub async fn setup_master_pin(&self, pin: &str) -> VaultResult<SetupOutcome> {
        let outcome = self.keys.setup_master_pin(pin).await?;
        self.after_unlock()?;
        Ok(outcome)
    }

    pub async fn unlock_with_pin(&self, pin: &str) -> VaultResult<()> {
        self.keys.unlock_with_pin(pin).await?;
        self.after_unlock()
    }

    pub async fn unlock_with_biometric(&self) -> VaultResult<()> {
        self.keys.unlock_with_biometric().await?;
        self.after_unlock()
    }

    /// Whether an unlock attempt would be let through right now.
    pub fn can_attempt_unlock(&self) -> VaultResult<AttemptDecision> {
        self.keys.rate_limiter().can_attempt()
    }

    /// Zeroizes the key, forgets decrypted state and ends the session.
    /// Safe to call at any time, including while locked or mid-unlock.
    pub fn lock(&self) -> VaultResult<()> {
        self.keys.lock();
        self.engine.clear_memory();
        self.sessions.invalidate_session()
    }

    /// Locks and forgets the biometric unlock path for this device. The
    /// cache, queue and PIN credential stay so the next unlock works
    /// offline.
    pub async fn logout(&self) -> VaultResult<()> {
        self.lock()?;
        self.keys.discard_wrapped_key().await?;
        self.log(ActivityEntry::new(
            ActivityAction::Logout,
            &self.device_id,
            self.clock.now_millis(),
        ));
        info!(user_id = %self.user_id, "logged out");
        Ok(())
    }

    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.keys.change_pin(old_pin, new_pin).await
    }

    pub async fn enable_biometric(&self) -> VaultResult<WrappedMasterKey> {
        self.ensure_unlocked()?;
        self.keys.enable_biometric().await
    }

    pub async fn disable_biometric(&self) -> VaultResult<()> {
        self.keys.discard_wrapped_key().await
    }

    fn after_unlock(&self) -> VaultResult<()> {
        let now = self.clock.now_millis();
        self.cache.upsert_device(&DeviceInfo {
            device_id: self.device_id.clone(),
            name: self.device.name.clone(),
            platform: self.device.platform.clone(),
            registered_at: now,
            last_seen_at: now,
        })?;
        if self
            .sessions
            .create_session_if(|| self.keys.is_unlocked())?
            .is_none()
        {
            info!(user_id = %self.user_id, "locked while unlocking, no session created");
            return Err(VaultError::UnlockAborted);
        }
        self.autolock.touch()
    }

    /// Fails with `NotUnlocked` when locked, locking first if the
    /// inactivity timeout ran out. Otherwise records activity.
    fn ensure_unlocked(&self) -> VaultResult<()> {
        if !self.keys.is_unlocked() {
            return Err(VaultError::NotUnlocked);
        }
        if self.autolock.is_expired()? {
            info!(user_id = %self.user_id, "inactivity timeout reached, locking");
            self.lock()?;
            return Err(VaultError::NotUnlocked);
        }
        self.autolock.touch()
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn is_session_valid(&self) -> bool {
        self.sessions.is_session_valid()
    }

    pub fn get_session_info(&self) -> Option<SessionInfo> {
        self.sessions.info()
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub async fn create_item(&self, item: Item) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Create(Entity::Item(item))).await
    }

    pub async fn update_item(&self, item: Item) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Update(Entity::Item(item))).await
    }

    pub async fn delete_item(&self, id: &str) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Delete {
            entity_type: EntityType::Item,
            id: id.to_string(),
        })
        .await
    }

    pub async fn toggle_favorite(&self, id: &str) -> VaultResult<MutationOutcome> {
        self.edit_item(id, |item| item.favorite = !item.favorite)
            .await
    }

    pub fn get_item(&self, id: &str) -> VaultResult<Item> {
        self.ensure_unlocked()?;
        self.keys.with_key(|key, integrity| {
            let codec = self.codec(key, integrity);
            match self.engine.current(&codec, EntityType::Item, id)? {
                Some(Entity::Item(item)) if item.deleted_at.is_none() => Ok(item),
                _ => Err(not_found(EntityType::Item, id)),
            }
        })
    }

    pub async fn load_items(&self) -> VaultResult<Listing<Item>> {
        let loaded = self.load(EntityType::Item).await?;
        Ok(listing(loaded, |e| match e {
            Entity::Item(item) => Some(item),
            _ => None,
        }))
    }

    // ========================================================================
    // Vaults
    // ========================================================================

    pub async fn create_vault(&self, vault: Vault) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Create(Entity::Vault(vault))).await
    }

    pub async fn update_vault(&self, vault: Vault) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Update(Entity::Vault(vault))).await
    }

    /// Deletes the vault and every live item in it.
    pub async fn delete_vault(&self, id: &str) -> VaultResult<MutationOutcome> {
        self.ensure_live(EntityType::Vault, id)?;
        let items = self
            .cache
            .get_all(&RecordFilter::of_type(EntityType::Item).in_vault(id))?;
        for record in &items {
            self.delete_item(&record.id).await?;
        }
        if !items.is_empty() {
            debug!(vault_id = id, items = items.len(), "vault contents deleted");
        }
        self.apply(Mutation::Delete {
            entity_type: EntityType::Vault,
            id: id.to_string(),
        })
        .await
    }

    pub async fn load_vaults(&self) -> VaultResult<Listing<Vault>> {
        let loaded = self.load(EntityType::Vault).await?;
        Ok(listing(loaded, |e| match e {
            Entity::Vault(vault) => Some(vault),
            _ => None,
        }))
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub async fn create_category(&self, category: Category) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Create(Entity::Category(category))).await
    }

    pub async fn update_category(&self, category: Category) -> VaultResult<MutationOutcome> {
        self.apply(Mutation::Update(Entity::Category(category))).await
    }

    /// Deletes the category. Items filed under it become uncategorized.
    pub async fn delete_category(&self, id: &str) -> VaultResult<MutationOutcome> {
        self.ensure_live(EntityType::Category, id)?;
        let items = self
            .cache
            .get_all(&RecordFilter::of_type(EntityType::Item).in_category(id))?;
        for record in &items {
            self.edit_item(&record.id, |item| item.category_id = None)
                .await?;
        }
        self.apply(Mutation::Delete {
            entity_type: EntityType::Category,
            id: id.to_string(),
        })
        .await
    }

    pub async fn load_categories(&self) -> VaultResult<Listing<Category>> {
        let loaded = self.load(EntityType::Category).await?;
        Ok(listing(loaded, |e| match e {
            Entity::Category(category) => Some(category),
            _ => None,
        }))
    }

    // ========================================================================
    // Mutation plumbing
    // ========================================================================

    async fn apply(&self, mutation: Mutation) -> VaultResult<MutationOutcome> {
        self.ensure_unlocked()?;
        let ticket = self.engine.begin(mutation).await;
        let staged = self.keys.with_key(|key, integrity| {
            let codec = self.codec(key, integrity);
            if let Mutation::Create(entity) | Mutation::Update(entity) = ticket.mutation() {
                self.check_parents(&codec, entity)?;
            }
            Ok(self.engine.stage(ticket, &codec)?)
        })?;
        self.propagate(staged).await
    }

    /// Read-modify-write of one item under its entity lock.
    async fn edit_item(&self, id: &str, edit: impl FnOnce(&mut Item)) -> VaultResult<MutationOutcome> {
        self.ensure_unlocked()?;
        let reservation = self.engine.reserve(EntityType::Item, id).await;
        let staged = self.keys.with_key(|key, integrity| {
            let codec = self.codec(key, integrity);
            let mut item = match self.engine.current(&codec, EntityType::Item, id)? {
                Some(Entity::Item(item)) if item.deleted_at.is_none() => item,
                _ => return Err(not_found(EntityType::Item, id)),
            };
            edit(&mut item);
            let ticket = reservation.into_ticket(Mutation::Update(Entity::Item(item)))?;
            Ok(self.engine.stage(ticket, &codec)?)
        })?;
        self.propagate(staged).await
    }

    async fn propagate(&self, staged: Staged) -> VaultResult<MutationOutcome> {
        let token = self.sessions.access_token()?;
        Ok(self.engine.propagate(staged, token.as_deref()).await?)
    }

    /// Items must sit in a live vault, and in a live category when they
    /// name one.
    fn check_parents(&self, codec: &RecordCodec<'_>, entity: &Entity) -> VaultResult<()> {
        let Entity::Item(item) = entity else {
            return Ok(());
        };
        if !self.is_live(codec, EntityType::Vault, &item.vault_id)? {
            return Err(not_found(EntityType::Vault, &item.vault_id));
        }
        if let Some(category_id) = &item.category_id
            && !self.is_live(codec, EntityType::Category, category_id)?
        {
            return Err(not_found(EntityType::Category, category_id));
        }
        Ok(())
    }

    fn ensure_live(&self, entity_type: EntityType, id: &str) -> VaultResult<()> {
        self.ensure_unlocked()?;
        self.keys.with_key(|key, integrity| {
            if self.is_live(&self.codec(key, integrity), entity_type, id)? {
                Ok(())
            } else {
                Err(not_found(entity_type, id))
            }
        })
    }

    fn is_live(&self, codec: &RecordCodec<'_>, entity_type: EntityType, id: &str) -> VaultResult<bool> {
        Ok(self
            .engine
            .current(codec, entity_type, id)?
            .is_some_and(|e| e.deleted_at().is_none()))
    }

    fn codec<'a>(&'a self, key: &'a DerivedKey, integrity: &'a IntegrityChecker) -> RecordCodec<'a> {
        RecordCodec::new(key, integrity, &self.user_id)
    }

    /// Online with a session: replays the queue, then rebuilds the cache
    /// from the remote. Otherwise reads the cache as is.
    async fn load(&self, entity_type: EntityType) -> VaultResult<Loaded> {
        self.ensure_unlocked()?;
        let token = self.sessions.access_token()?;
        if let Some(token) = token.as_deref()
            && self.engine.is_online()
            && self.engine.pending_count()? > 0
        {
            let report = self.engine.replay(token).await?;
            debug!(delivered = report.delivered, "replayed before read");
        }
        let snapshot = self
            .engine
            .fetch_authoritative(entity_type, token.as_deref())
            .await?;
        let loaded = self.keys.with_key(|key, integrity| {
            Ok(self
                .engine
                .rebuild_and_read(entity_type, snapshot, &self.codec(key, integrity))?)
        })?;
        if !loaded.alerts.is_empty() {
            warn!(%entity_type, withheld = loaded.alerts.len(), "records failed verification");
        }
        Ok(loaded)
    }

    // ========================================================================
    // Connectivity and the offline queue
    // ========================================================================

    pub fn is_online(&self) -> bool {
        self.engine.is_online()
    }

    /// Records a connectivity change. Coming back online with a session
    /// replays the queue and returns the report.
    pub async fn set_online(&self, online: bool) -> VaultResult<Option<ReplayReport>> {
        let was_online = self.engine.set_online(online);
        if !online || was_online {
            return Ok(None);
        }
        let Some(token) = self.sessions.access_token()? else {
            debug!("back online without a session, replay deferred");
            return Ok(None);
        };
        Ok(Some(self.engine.replay(&token).await?))
    }

    pub async fn replay_pending(&self) -> VaultResult<ReplayReport> {
        let token = self.sessions.access_token()?.ok_or(VaultError::NoSession)?;
        Ok(self.engine.replay(&token).await?)
    }

    pub fn pending_sync_count(&self) -> VaultResult<usize> {
        Ok(self.engine.pending_count()?)
    }

    pub fn pending_sync_entries(&self) -> VaultResult<Vec<SyncQueueEntry>> {
        Ok(self.engine.pending_entries()?)
    }

    /// Entries the remote refused for good, awaiting a decision.
    pub fn failed_sync_entries(&self) -> VaultResult<Vec<SyncQueueEntry>> {
        Ok(self.engine.failed_entries()?)
    }

    pub fn retry_failed(&self, seq: i64) -> VaultResult<()> {
        Ok(self.engine.retry_failed(seq)?)
    }

    pub fn discard_failed(&self, seq: i64) -> VaultResult<SyncQueueEntry> {
        Ok(self.engine.discard_failed(seq)?)
    }

    pub fn purge_tombstones(&self, older_than: chrono::Duration) -> VaultResult<usize> {
        Ok(self.engine.purge_tombstones(older_than)?)
    }

    // ========================================================================
    // Devices, activity, auto-lock
    // ========================================================================

    pub fn list_devices(&self) -> VaultResult<Vec<DeviceInfo>> {
        Ok(self.cache.list_devices()?)
    }

    /// Most recent first.
    pub fn activity_log(&self, limit: usize) -> VaultResult<Vec<ActivityEntry>> {
        Ok(self.cache.recent_activity(limit)?)
    }

    pub fn auto_lock_minutes(&self) -> VaultResult<u32> {
        self.autolock.minutes()
    }

    pub fn set_auto_lock_minutes(&self, minutes: u32) -> VaultResult<()> {
        self.autolock.set_minutes(minutes)
    }

    pub fn should_auto_lock(&self) -> VaultResult<bool> {
        Ok(self.keys.is_unlocked() && self.autolock.is_expired()?)
    }

    /// Locks if the inactivity timeout ran out. Returns whether it locked.
    pub fn enforce_auto_lock(&self) -> VaultResult<bool> {
        if !self.should_auto_lock()? {
            return Ok(false);
        }
        self.lock()?;
        Ok(true)
    }

    fn log(&self, entry: ActivityEntry) {
        if let Err(e) = self.cache.append_activity(&entry) {
            warn!(action = entry.action.as_str(), "could not record activity: {e}");
        }
    }
}

fn load_or_create_device_id(cache: &UserCache) -> VaultResult<String> {
    if let Some(id) = cache.get_meta_json::<String>(MetaKey::DeviceId)? {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    cache.put_meta_json(MetaKey::DeviceId, &id)?;
    info!(device_id = %id, "registered new device id");
    Ok(id)
}

fn not_found(entity_type: EntityType, id: &str) -> VaultError {
    VaultError::NotFound {
        entity_type,
        entity_id: id.to_string(),
    }
}

fn listing<T>(loaded: Loaded, pick: impl Fn(Entity) -> Option<T>) -> Listing<T> {
    Listing {
        entries: loaded.entities.into_iter().filter_map(pick).collect(),
        alerts: loaded.alerts,
    }
}
