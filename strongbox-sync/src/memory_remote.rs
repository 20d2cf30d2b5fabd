//! In-process remote store with failure injection.
//!
//! Behaves like the HTTP backend: it stamps `updated_at` with its own
//! clock, soft-deletes on delete, refuses duplicate creates, and returns
//! tombstones from `fetch_all`. Useful for offline-first development and
//! for exercising the replay paths.

use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use strongbox_types::{Clock, EncryptedRecord, EntityType, SystemClock};

/// Per-operation call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub fetches: usize,
}

#[derive(Default)]
struct RemoteState {
    records: HashMap<(EntityType, String), EncryptedRecord>,
    calls: RemoteCalls,
    offline: bool,
    injected: VecDeque<RemoteError>,
    rejected_ids: HashMap<String, (u16, String)>,
    tokens_seen: HashSet<String>,
    last_stamp: i64,
}

pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            clock,
        }
    }

    /// While offline every call fails with [`RemoteError::Transient`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Queues an error returned by the next call, whatever it is.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().injected.push_back(error);
    }

    /// Permanently rejects writes to `id`.
    pub fn reject_entity(&self, id: impl Into<String>, status: u16, message: impl Into<String>) {
        self.lock()
            .rejected_ids
            .insert(id.into(), (status, message.into()));
    }

    pub fn accept_entity(&self, id: &str) {
        self.lock().rejected_ids.remove(id);
    }

    pub fn calls(&self) -> RemoteCalls {
        self.lock().calls.clone()
    }

    pub fn record(&self, entity_type: EntityType, id: &str) -> Option<EncryptedRecord> {
        self.lock()
            .records
            .get(&(entity_type, id.to_string()))
            .cloned()
    }

    /// Number of stored records of a type, tombstones included.
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.lock()
            .records
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .count()
    }

    /// Stores a record directly, bypassing counters and failure injection.
    pub fn seed(&self, record: EncryptedRecord) {
        self.lock()
            .records
            .insert((record.entity_type, record.id.clone()), record);
    }

    pub fn tokens_seen(&self) -> HashSet<String> {
        self.lock().tokens_seen.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Common gate for every call: token bookkeeping, connectivity, and
    /// injected failures.
    fn admit(&self, state: &mut RemoteState, token: &str) -> RemoteResult<i64> {
        state.tokens_seen.insert(token.to_string());
        if state.offline {
            return Err(RemoteError::Transient("offline".into()));
        }
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        let stamp = self.clock.now_millis().max(state.last_stamp + 1);
        state.last_stamp = stamp;
        Ok(stamp)
    }

    fn check_rejected(state: &RemoteState, id: &str) -> RemoteResult<()> {
        match state.rejected_ids.get(id) {
            Some((status, message)) => Err(RemoteError::Rejected {
                status: *status,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn create(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord> {
        let mut state = self.lock();
        state.calls.creates += 1;
        let stamp = self.admit(&mut state, token)?;
        Self::check_rejected(&state, &record.id)?;

        let key = (record.entity_type, record.id.clone());
        if state.records.contains_key(&key) {
            return Err(RemoteError::AlreadyExists);
        }
        let mut stored = record.clone();
        stored.updated_at = stamp;
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord> {
        let mut state = self.lock();
        state.calls.updates += 1;
        let stamp = self.admit(&mut state, token)?;
        Self::check_rejected(&state, &record.id)?;

        let key = (record.entity_type, record.id.clone());
        let created_at = match state.records.get(&key) {
            Some(existing) => existing.created_at,
            None => return Err(RemoteError::NotFound),
        };
        let mut stored = record.clone();
        stored.created_at = created_at;
        stored.updated_at = stamp;
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, token: &str, entity_type: EntityType, id: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.deletes += 1;
        let stamp = self.admit(&mut state, token)?;
        Self::check_rejected(&state, id)?;

        match state.records.get_mut(&(entity_type, id.to_string())) {
            Some(existing) => {
                existing.deleted_at = Some(stamp);
                existing.updated_at = stamp;
                Ok(())
            }
            None => Err(RemoteError::NotFound),
        }
    }

    async fn fetch_all(&self, token: &str, entity_type: EntityType) -> RemoteResult<Vec<EncryptedRecord>> {
        let mut state = self.lock();
        state.calls.fetches += 1;
        self.admit(&mut state, token)?;

        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
