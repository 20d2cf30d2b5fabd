//! Pending-sync queue types.

use crate::record::{EncryptedRecord, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(format!("unknown sync action: {other}")),
        }
    }
}

/// Whether a queue entry is still eligible for replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Waiting for delivery.
    Pending,
    /// Permanently rejected by the remote; parked until the user retries
    /// or discards it.
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "pending",
            QueueState::Failed => "failed",
        }
    }
}

impl FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueState::Pending),
            "failed" => Ok(QueueState::Failed),
            other => Err(format!("unknown queue state: {other}")),
        }
    }
}

/// A mutation to be enqueued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub action: SyncAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Encrypted record for create/update; `None` for deletes.
    pub payload: Option<EncryptedRecord>,
}

impl NewQueueEntry {
    pub fn upsert(action: SyncAction, record: EncryptedRecord) -> Self {
        Self {
            action,
            entity_type: record.entity_type,
            entity_id: record.id.clone(),
            payload: Some(record),
        }
    }

    pub fn delete(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            action: SyncAction::Delete,
            entity_type,
            entity_id: entity_id.into(),
            payload: None,
        }
    }
}

/// A persisted, not-yet-acknowledged mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncQueueEntry {
    /// Monotonic enqueue position; replay order is ascending `seq`.
    pub seq: i64,
    pub action: SyncAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: Option<EncryptedRecord>,
    pub enqueued_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: QueueState,
}

impl SyncQueueEntry {
    pub fn entity_key(&self) -> (EntityType, &str) {
        (self.entity_type, self.entity_id.as_str())
    }
}
