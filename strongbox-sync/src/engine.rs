//! Sync reconciliation engine.
//!
//! Every mutation walks the same state machine:
//!
//! ```text
//! Applying ──▶ Cached ──┬──▶ Acknowledged
//!                       └──▶ Queued
//! ```
//!
//! - **Applying**: the mutation lands in [`MemoryState`] immediately.
//! - **Cached**: the re-encrypted record is written to the local cache.
//!   A cache failure keeps the in-memory state (flagged unsynced), still
//!   tries to record a queue entry, and fails the operation.
//! - **Acknowledged**: the remote accepted the write; server-confirmed
//!   metadata is merged back into the cache and memory.
//! - **Queued**: offline, no session, an earlier entry for the same entity
//!   is still queued, or the remote failed transiently. A permanent
//!   rejection parks the entry as failed instead.
//!
//! Mutations on one entity are serialized by a per-entity async lock that
//! is held from [`SyncEngine::begin`] until [`SyncEngine::propagate`]
//! returns. [`SyncEngine::stage`] is synchronous: it is the only step that
//! needs key material, so callers can lend the master key for exactly that
//! call and release it before any network I/O.

use crate::codec::RecordCodec;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::state::MemoryState;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use strongbox_storage::UserCache;
use strongbox_types::{
    ActivityAction, ActivityEntry, Clock, EncryptedRecord, Entity, EntityType, NewQueueEntry,
    QueueState, RecordFilter, SyncAction, SyncQueueEntry,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

type EntityKey = (EntityType, String);

/// A requested change to one entity.
#[derive(Debug, Clone)]
pub enum Mutation {
    Create(Entity),
    Update(Entity),
    Delete { entity_type: EntityType, id: String },
}

impl Mutation {
    pub fn action(&self) -> SyncAction {
        match self {
            Mutation::Create(_) => SyncAction::Create,
            Mutation::Update(_) => SyncAction::Update,
            Mutation::Delete { .. } => SyncAction::Delete,
        }
    }

    fn key(&self) -> EntityKey {
        match self {
            Mutation::Create(e) | Mutation::Update(e) => (e.entity_type(), e.id().to_string()),
            Mutation::Delete { entity_type, id } => (*entity_type, id.clone()),
        }
    }
}

/// Exclusive right to mutate one entity.
pub struct Ticket {
    guard: OwnedMutexGuard<()>,
    mutation: Mutation,
}

impl Ticket {
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }
}

/// A held entity lock with no mutation decided yet. Lets a caller read the
/// current version and derive the mutation from it without racing other
/// writers.
pub struct Reservation {
    guard: OwnedMutexGuard<()>,
    entity_type: EntityType,
    id: String,
}

impl Reservation {
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fails with `NotFound` if `mutation` targets a different entity.
    pub fn into_ticket(self, mutation: Mutation) -> SyncResult<Ticket> {
        let (entity_type, id) = mutation.key();
        if entity_type != self.entity_type || id != self.id {
            return Err(SyncError::NotFound {
                entity_type,
                entity_id: id,
            });
        }
        Ok(Ticket {
            guard: self.guard,
            mutation,
        })
    }
}

/// Marks an entity whose cached row is written but not yet delivered or
/// queued. Cache rebuilds leave such rows alone.
struct InFlight {
    registry: Arc<StdMutex<HashSet<EntityKey>>>,
    key: EntityKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// A mutation that reached the Cached state.
pub struct Staged {
    _guard: OwnedMutexGuard<()>,
    _in_flight: InFlight,
    action: SyncAction,
    entity: Entity,
    record: EncryptedRecord,
}

impl Staged {
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn record(&self) -> &EncryptedRecord {
        &self.record
    }
}

/// Why a mutation went to the queue instead of the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    Offline,
    NoSession,
    /// Earlier entries for the same entity are still queued.
    Backlog,
    RemoteUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Acknowledged,
    Queued { seq: i64, reason: QueueReason },
}

#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The entity as it now stands in memory, server metadata merged when
    /// acknowledged.
    pub entity: Entity,
    pub status: MutationStatus,
}

/// A queue entry the remote refused for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub seq: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    pub still_queued: usize,
    pub rejected: Vec<RejectedEntry>,
}

/// A record withheld from a read because it could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityAlert {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub reason: String,
}

/// Result of a read: trusted entities plus alerts for withheld records.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub entities: Vec<Entity>,
    pub alerts: Vec<IntegrityAlert>,
}

enum Delivery {
    Acked(Option<EncryptedRecord>),
    Retry(RemoteError),
    Rejected(String),
}

pub struct SyncEngine {
    cache: UserCache,
    remote: Arc<dyn RemoteStore>,
    state: MemoryState,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    device_id: String,
    online: AtomicBool,
    entity_locks: StdMutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
    /// Staged entities. Held across a rebuild's delete pass.
    in_flight: Arc<StdMutex<HashSet<EntityKey>>>,
    /// Serializes replay passes.
    replay_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        cache: UserCache,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            remote,
            state: MemoryState::new(),
            config,
            clock,
            device_id: device_id.into(),
            online: AtomicBool::new(true),
            entity_locks: StdMutex::new(HashMap::new()),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            replay_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &UserCache {
        &self.cache
    }

    pub fn state(&self) -> &MemoryState {
        &self.state
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "connectivity changed");
        }
        was
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Waits for exclusive access to the mutation's entity.
    pub async fn begin(&self, mutation: Mutation) -> Ticket {
        let (entity_type, id) = mutation.key();
        let guard = self.lock_entity(entity_type, &id).await;
        Ticket { guard, mutation }
    }

    /// Waits for exclusive access to an entity before the mutation is known.
    pub async fn reserve(&self, entity_type: EntityType, id: &str) -> Reservation {
        let guard = self.lock_entity(entity_type, id).await;
        Reservation {
            guard,
            entity_type,
            id: id.to_string(),
        }
    }

    /// Applying and Cached. Needs the session's key material via `codec`.
    pub fn stage(&self, ticket: Ticket, codec: &RecordCodec<'_>) -> SyncResult<Staged> {
        let Ticket { guard, mutation } = ticket;
        let now = self.clock.now_millis();
        let action = mutation.action();

        let entity = match mutation {
            Mutation::Create(mut entity) => {
                entity.touch(now);
                entity
            }
            Mutation::Update(mut entity) => {
                let (entity_type, id) = (entity.entity_type(), entity.id().to_string());
                self.live(codec, entity_type, &id)?;
                entity.touch(now);
                entity
            }
            Mutation::Delete { entity_type, id } => {
                let mut entity = self.live(codec, entity_type, &id)?;
                entity.soft_delete(now);
                entity
            }
        };
        let record = codec.seal(&entity)?;
        let (entity_type, id) = (record.entity_type, record.id.clone());

        let in_flight = self.mark_in_flight(entity_type, &id);

        // Applying
        self.state.apply(entity.clone());
        self.state.mark_unsynced(entity_type, &id);
        debug!(%entity_type, %id, %action, "mutation applied");

        // Cached
        if let Err(source) = self.cache.put(&record) {
            let queued = match self.cache.enqueue(queue_entry(action, &record), now) {
                Ok(_) => true,
                Err(e) => {
                    error!(%entity_type, %id, "could not queue unpersisted mutation: {e}");
                    false
                }
            };
            warn!(%entity_type, %id, queued, "cache write failed: {source}");
            return Err(SyncError::Persistence {
                entity_type,
                entity_id: id,
                queued,
                source,
            });
        }

        Ok(Staged {
            _guard: guard,
            _in_flight: in_flight,
            action,
            entity,
            record,
        })
    }

    /// Acknowledged or Queued. Never touches key material; `token` is the
    /// caller's own copy of the session token.
    pub async fn propagate(&self, staged: Staged, token: Option<&str>) -> SyncResult<MutationOutcome> {
        let Staged {
            _guard,
            _in_flight,
            action,
            entity,
            record,
        } = staged;
        let (entity_type, id) = (record.entity_type, record.id.clone());

        let token = match token {
            _ if !self.is_online() => return self.queue(action, entity, &record, QueueReason::Offline),
            None => return self.queue(action, entity, &record, QueueReason::NoSession),
            Some(token) => token,
        };
        if self.cache.has_queue_entries_for(entity_type, &id)? {
            return self.queue(action, entity, &record, QueueReason::Backlog);
        }

        match self.send(token, action, entity_type, &id, Some(&record)).await {
            Ok(confirmed) => {
                self.confirm(&record, confirmed.as_ref())?;
                self.log_delivery(action, entity_type, &id);
                debug!(%entity_type, %id, %action, "mutation acknowledged");
                Ok(MutationOutcome {
                    entity: self.state.get(entity_type, &id).unwrap_or(entity),
                    status: MutationStatus::Acknowledged,
                })
            }
            Err(RemoteError::Rejected { status, message }) => {
                let message = format!("{status}: {message}");
                let seq = self.cache.enqueue(queue_entry(action, &record), self.clock.now_millis())?.seq;
                self.cache.mark_failed(seq, &message)?;
                error!(%entity_type, %id, seq, "remote rejected mutation: {message}");
                Err(SyncError::Rejected {
                    entity_type,
                    entity_id: id,
                    seq,
                    message,
                })
            }
            Err(e) => {
                warn!(%entity_type, %id, "remote write failed, queueing: {e}");
                self.queue(action, entity, &record, QueueReason::RemoteUnavailable(e.to_string()))
            }
        }
    }

    fn queue(
        &self,
        action: SyncAction,
        entity: Entity,
        record: &EncryptedRecord,
        reason: QueueReason,
    ) -> SyncResult<MutationOutcome> {
        let outcome = self
            .cache
            .enqueue(queue_entry(action, record), self.clock.now_millis())?;
        debug!(
            entity_type = %record.entity_type,
            id = %record.id,
            seq = outcome.seq,
            ?reason,
            "mutation queued"
        );
        Ok(MutationOutcome {
            entity,
            status: MutationStatus::Queued {
                seq: outcome.seq,
                reason,
            },
        })
    }

    /// The current, non-deleted version of an entity.
    fn live(&self, codec: &RecordCodec<'_>, entity_type: EntityType, id: &str) -> SyncResult<Entity> {
        self.current(codec, entity_type, id)?
            .filter(|e| e.deleted_at().is_none())
            .ok_or_else(|| SyncError::NotFound {
                entity_type,
                entity_id: id.to_string(),
            })
    }

    /// Looks an entity up in memory, falling back to decrypting it from
    /// the cache. Tombstones are returned.
    pub fn current(
        &self,
        codec: &RecordCodec<'_>,
        entity_type: EntityType,
        id: &str,
    ) -> SyncResult<Option<Entity>> {
        if let Some(entity) = self.state.get(entity_type, id) {
            return Ok(Some(entity));
        }
        match self.cache.get(entity_type, id)? {
            Some(record) => {
                let entity = codec.open(&record)?;
                self.state.apply(entity.clone());
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Remote delivery
    // ========================================================================

    /// One remote round trip for a mutation, resolving the idempotent cases:
    /// a create that already exists is resent as an update, an update of a
    /// missing entity is resent as a create, and deleting a missing entity
    /// counts as done.
    async fn send(
        &self,
        token: &str,
        action: SyncAction,
        entity_type: EntityType,
        id: &str,
        payload: Option<&EncryptedRecord>,
    ) -> RemoteResult<Option<EncryptedRecord>> {
        if action == SyncAction::Delete {
            return match self.remote.delete(token, entity_type, id).await {
                Ok(()) | Err(RemoteError::NotFound) => Ok(None),
                Err(e) => Err(e),
            };
        }
        let record = payload.ok_or_else(|| RemoteError::Rejected {
            status: 0,
            message: "queue entry has no payload".into(),
        })?;
        let confirmed = match action {
            SyncAction::Create => match self.remote.create(token, record).await {
                Err(RemoteError::AlreadyExists) => self.remote.update(token, record).await,
                other => other,
            },
            _ => match self.remote.update(token, record).await {
                Err(RemoteError::NotFound) => self.remote.create(token, record).await,
                other => other,
            },
        }?;
        Ok(Some(confirmed))
    }

    /// Merges server-confirmed metadata, but only into copies that still
    /// hold what was sent; a newer local write wins until it is delivered.
    /// A missing cached row is restored from what was sent.
    fn confirm(&self, sent: &EncryptedRecord, confirmed: Option<&EncryptedRecord>) -> SyncResult<()> {
        let (entity_type, id) = (sent.entity_type, sent.id.as_str());
        if let Some(confirmed) = confirmed {
            match self.cache.get(entity_type, id)? {
                Some(cached) if cached.ciphertext != sent.ciphertext => {}
                cached => {
                    if cached.is_none() {
                        warn!(%entity_type, %id, "delivered record missing from cache, restoring");
                    }
                    let mut merged = cached.unwrap_or_else(|| sent.clone());
                    merged.created_at = confirmed.created_at;
                    merged.updated_at = confirmed.updated_at;
                    merged.deleted_at = confirmed.deleted_at;
                    self.cache.put(&merged)?;
                }
            }
            if let Some(mut entity) = self.state.get(entity_type, id)
                && entity.updated_at() == sent.updated_at
                && entity.deleted_at() == sent.deleted_at
            {
                entity.merge_confirmed(confirmed);
                self.state.apply(entity);
            }
        }
        if !self.cache.has_queue_entries_for(entity_type, id)? {
            self.state.mark_synced(entity_type, id);
        }
        Ok(())
    }

    fn log_delivery(&self, action: SyncAction, entity_type: EntityType, id: &str) {
        let activity = match action {
            SyncAction::Create => ActivityAction::EntityCreated,
            SyncAction::Update => ActivityAction::EntityUpdated,
            SyncAction::Delete => ActivityAction::EntityDeleted,
        };
        let entry = ActivityEntry::new(activity, &self.device_id, self.clock.now_millis())
            .for_entity(entity_type, id);
        if let Err(e) = self.cache.append_activity(&entry) {
            warn!(%entity_type, %id, "could not record activity: {e}");
        }
    }

    // ========================================================================
    // Queue replay
    // ========================================================================

    /// Delivers pending entries strictly in enqueue order.
    ///
    /// A failing entry stays at the head for its entity and every later
    /// entry for that entity is held back, while independent entities keep
    /// going. Entities with a failed (rejected) entry are held back too.
    pub async fn replay(&self, token: &str) -> SyncResult<ReplayReport> {
        let _replaying = self.replay_lock.lock().await;
        let entries = self.cache.queue_entries()?;
        let mut blocked: HashSet<EntityKey> = entries
            .iter()
            .filter(|e| e.state == QueueState::Failed)
            .map(|e| (e.entity_type, e.entity_id.clone()))
            .collect();

        let mut report = ReplayReport::default();
        for entry in entries.into_iter().filter(|e| e.state == QueueState::Pending) {
            let key = (entry.entity_type, entry.entity_id.clone());
            if blocked.contains(&key) || !self.is_online() {
                report.still_queued += 1;
                continue;
            }

            let _guard = self.lock_entity(entry.entity_type, &entry.entity_id).await;
            // A live mutation may have coalesced into this entry while we
            // waited; always send what is stored now.
            let Some(entry) = self
                .cache
                .queue_entry(entry.seq)?
                .filter(|e| e.state == QueueState::Pending)
            else {
                continue;
            };

            match self.deliver(token, &entry).await {
                Delivery::Acked(confirmed) => {
                    self.cache.remove_entry(entry.seq)?;
                    if let Some(sent) = &entry.payload {
                        self.confirm(sent, confirmed.as_ref())?;
                    } else if !self.cache.has_queue_entries_for(entry.entity_type, &entry.entity_id)? {
                        self.state.mark_synced(entry.entity_type, &entry.entity_id);
                    }
                    self.log_delivery(entry.action, entry.entity_type, &entry.entity_id);
                    report.delivered += 1;
                }
                Delivery::Retry(e) => {
                    self.cache.record_attempt_failure(entry.seq, &e.to_string())?;
                    warn!(seq = entry.seq, entity_id = %entry.entity_id, "replay left entry queued: {e}");
                    blocked.insert(key);
                    report.still_queued += 1;
                }
                Delivery::Rejected(message) => {
                    self.cache.mark_failed(entry.seq, &message)?;
                    error!(seq = entry.seq, entity_id = %entry.entity_id, "remote rejected queued entry: {message}");
                    blocked.insert(key);
                    report.rejected.push(RejectedEntry {
                        seq: entry.seq,
                        entity_type: entry.entity_type,
                        entity_id: entry.entity_id.clone(),
                        message,
                    });
                }
            }
        }

        info!(
            delivered = report.delivered,
            still_queued = report.still_queued,
            rejected = report.rejected.len(),
            "queue replay finished"
        );
        Ok(report)
    }

    async fn deliver(&self, token: &str, entry: &SyncQueueEntry) -> Delivery {
        let attempts = self.config.max_attempts.max(1);
        let mut last = RemoteError::Transient("not attempted".into());
        for attempt in 0..attempts {
            let result = self
                .send(
                    token,
                    entry.action,
                    entry.entity_type,
                    &entry.entity_id,
                    entry.payload.as_ref(),
                )
                .await;
            match result {
                Ok(confirmed) => return Delivery::Acked(confirmed),
                Err(RemoteError::Rejected { status, message }) => {
                    return Delivery::Rejected(format!("{status}: {message}"));
                }
                // the same token will not start working on a retry
                Err(RemoteError::Unauthorized) => return Delivery::Retry(RemoteError::Unauthorized),
                Err(e) => {
                    if attempt + 1 < attempts {
                        let backoff = self.config.backoff(attempt);
                        debug!(seq = entry.seq, "replay attempt failed, retrying in {backoff:?}: {e}");
                        tokio::time::sleep(backoff).await;
                    }
                    last = e;
                }
            }
        }
        Delivery::Retry(last)
    }

    pub fn pending_entries(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        Ok(self.cache.pending_entries()?)
    }

    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.cache.pending_count()?)
    }

    pub fn failed_entries(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        Ok(self.cache.failed_entries()?)
    }

    /// Puts a rejected entry back in line at its original position.
    pub fn retry_failed(&self, seq: i64) -> SyncResult<()> {
        self.cache.retry_failed(seq)?;
        info!(seq, "failed queue entry returned to pending");
        Ok(())
    }

    /// Gives up on a rejected entry. The local copy is kept; once nothing
    /// else is queued for the entity the next authoritative read replaces
    /// it.
    pub fn discard_failed(&self, seq: i64) -> SyncResult<SyncQueueEntry> {
        let entry = self.cache.discard_failed(seq)?;
        if !self.cache.has_queue_entries_for(entry.entity_type, &entry.entity_id)? {
            self.state.mark_synced(entry.entity_type, &entry.entity_id);
        }
        info!(seq, entity_id = %entry.entity_id, "failed queue entry discarded");
        Ok(entry)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Fetches authoritative records when online. `None` means the caller
    /// should read from the cache: offline, no session, or the remote is
    /// temporarily unreachable.
    pub async fn fetch_authoritative(
        &self,
        entity_type: EntityType,
        token: Option<&str>,
    ) -> SyncResult<Option<Vec<EncryptedRecord>>> {
        let Some(token) = token.filter(|_| self.is_online()) else {
            return Ok(None);
        };
        match self.remote.fetch_all(token, entity_type).await {
            Ok(records) => Ok(Some(records)),
            Err(e) if e.is_transient() => {
                warn!(%entity_type, "remote fetch failed, reading from cache: {e}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds the cache from `snapshot` (if any), then decrypts every
    /// record of `entity_type`. Records that fail verification are withheld
    /// and reported as alerts. Tombstones never appear in the result.
    pub fn rebuild_and_read(
        &self,
        entity_type: EntityType,
        snapshot: Option<Vec<EncryptedRecord>>,
        codec: &RecordCodec<'_>,
    ) -> SyncResult<Loaded> {
        if let Some(records) = snapshot {
            // staging blocks on this lock, so no write lands between
            // collecting `preserve` and the delete pass
            let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let mut preserve: HashSet<String> =
                self.cache.queued_entity_ids(entity_type)?.into_iter().collect();
            preserve.extend(
                in_flight
                    .iter()
                    .filter(|(t, _)| *t == entity_type)
                    .map(|(_, id)| id.clone()),
            );
            let written = self.cache.replace_all(entity_type, &records, &preserve)?;
            drop(in_flight);
            debug!(%entity_type, written, preserved = preserve.len(), "cache rebuilt from remote");
        }

        let records = self
            .cache
            .get_all(&RecordFilter::of_type(entity_type).with_deleted())?;
        let mut opened = Vec::with_capacity(records.len());
        let mut alerts = Vec::new();
        for record in &records {
            match codec.open(record) {
                Ok(entity) => opened.push(entity),
                Err(SyncError::IntegrityViolation {
                    entity_type,
                    entity_id,
                    reason,
                }) => {
                    error!(%entity_type, %entity_id, "integrity violation, record withheld: {reason}");
                    let entry = ActivityEntry::new(
                        ActivityAction::IntegrityAlert,
                        &self.device_id,
                        self.clock.now_millis(),
                    )
                    .for_entity(entity_type, &entity_id)
                    .with_detail(reason.clone());
                    if let Err(e) = self.cache.append_activity(&entry) {
                        warn!("could not record integrity alert: {e}");
                    }
                    alerts.push(IntegrityAlert {
                        entity_type,
                        entity_id,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        self.state.replace_type(entity_type, opened);

        let mut entities: Vec<Entity> = self
            .state
            .of_type(entity_type)
            .into_iter()
            .filter(|e| e.deleted_at().is_none())
            .collect();
        entities.sort_by(|a, b| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(Loaded { entities, alerts })
    }

    /// Physically removes tombstones older than `older_than`, except those
    /// still waiting on the remote.
    pub fn purge_tombstones(&self, older_than: chrono::Duration) -> SyncResult<usize> {
        let cutoff = self.clock.now_millis() - older_than.num_milliseconds();
        let removed = self.cache.purge_tombstones(cutoff)?;
        self.state.forget_tombstones(cutoff);
        info!(removed, "tombstones purged");
        Ok(removed)
    }

    /// Forgets all decrypted state. Called on lock.
    pub fn clear_memory(&self) {
        self.state.clear();
    }

    fn mark_in_flight(&self, entity_type: EntityType, id: &str) -> InFlight {
        let key = (entity_type, id.to_string());
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        InFlight {
            registry: Arc::clone(&self.in_flight),
            key,
        }
    }

    async fn lock_entity(&self, entity_type: EntityType, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.entity_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry((entity_type, id.to_string())).or_default())
        };
        lock.lock_owned().await
    }
}

fn queue_entry(action: SyncAction, record: &EncryptedRecord) -> NewQueueEntry {
    match action {
        SyncAction::Delete => NewQueueEntry::delete(record.entity_type, record.id.clone()),
        _ => NewQueueEntry::upsert(action, record.clone()),
    }
}
