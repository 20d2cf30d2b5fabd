//! Durable pending-sync queue.
//!
//! Entries are ordered by a per-user monotonic `seq`. Enqueueing applies
//! the coalescing rules in one transaction:
//! - a create/update for an entity whose newest pending entry is also a
//!   create/update replaces that entry's payload in place (keeping its
//!   position and, for a create, its action);
//! - a delete drops every pending create/update for the entity and is
//!   itself deduplicated, so at most one pending delete exists per entity.
//!
//! Entries parked in the `failed` state are never coalesced into.

use crate::cache::UserCache;
use crate::error::{StorageError, StorageResult};
use duckdb::{Connection, params};
use strongbox_types::{
    EncryptedRecord, EntityType, NewQueueEntry, QueueState, SyncAction, SyncQueueEntry,
};

/// What [`UserCache::enqueue`] did with a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueDisposition {
    /// Appended at the tail.
    Appended,
    /// Merged into an existing pending create/update.
    Coalesced,
    /// A pending delete for the entity already existed.
    Deduplicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Position of the entry that now carries the mutation.
    pub seq: i64,
    pub disposition: EnqueueDisposition,
}

const QUEUE_COLUMNS: &str =
    "seq, action, entity_type, entity_id, payload, enqueued_at, attempts, last_error, state";

type RawEntry = (
    i64,
    String,
    String,
    String,
    Option<String>,
    i64,
    i32,
    Option<String>,
    String,
);

impl UserCache {
    pub fn enqueue(&self, entry: NewQueueEntry, now_millis: i64) -> StorageResult<EnqueueOutcome> {
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Allocated before any delete below so a dropped tail entry's seq is
        // never reinserted in the same transaction.
        let next_seq = next_seq(&tx, &self.user_id)?;
        let pending = entries_for(&tx, &self.user_id, entry.entity_type, &entry.entity_id)?;
        let pending: Vec<(i64, SyncAction)> = pending
            .into_iter()
            .filter(|(_, _, state)| *state == QueueState::Pending)
            .map(|(seq, action, _)| (seq, action))
            .collect();

        let outcome = match entry.action {
            SyncAction::Delete => {
                for (seq, action) in &pending {
                    if *action != SyncAction::Delete {
                        tx.execute(
                            "DELETE FROM sync_queue WHERE user_id = ? AND seq = ?",
                            params![self.user_id, seq],
                        )?;
                    }
                }
                match pending.iter().find(|(_, a)| *a == SyncAction::Delete) {
                    Some((seq, _)) => EnqueueOutcome {
                        seq: *seq,
                        disposition: EnqueueDisposition::Deduplicated,
                    },
                    None => EnqueueOutcome {
                        seq: append(&tx, &self.user_id, next_seq, &entry, payload.as_deref(), now_millis)?,
                        disposition: EnqueueDisposition::Appended,
                    },
                }
            }
            SyncAction::Create | SyncAction::Update => match pending.last() {
                Some((seq, action)) if *action != SyncAction::Delete => {
                    tx.execute(
                        "UPDATE sync_queue SET payload = ? WHERE user_id = ? AND seq = ?",
                        params![payload, self.user_id, seq],
                    )?;
                    EnqueueOutcome {
                        seq: *seq,
                        disposition: EnqueueDisposition::Coalesced,
                    }
                }
                _ => EnqueueOutcome {
                    seq: append(&tx, &self.user_id, next_seq, &entry, payload.as_deref(), now_millis)?,
                    disposition: EnqueueDisposition::Appended,
                },
            },
        };

        tx.commit()?;
        tracing::debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            action = %entry.action,
            seq = outcome.seq,
            disposition = ?outcome.disposition,
            "sync queue entry stored"
        );
        Ok(outcome)
    }

    /// Pending entries in replay order.
    pub fn pending_entries(&self) -> StorageResult<Vec<SyncQueueEntry>> {
        self.entries_in_state(Some(QueueState::Pending))
    }

    pub fn failed_entries(&self) -> StorageResult<Vec<SyncQueueEntry>> {
        self.entries_in_state(Some(QueueState::Failed))
    }

    /// Every entry, pending and failed, in seq order.
    pub fn queue_entries(&self) -> StorageResult<Vec<SyncQueueEntry>> {
        self.entries_in_state(None)
    }

    pub fn queue_entry(&self, seq: i64) -> StorageResult<Option<SyncQueueEntry>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE user_id = ? AND seq = ?"),
            params![self.user_id, seq],
            read_raw,
        );
        match result {
            Ok(raw) => Ok(Some(from_raw(raw)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE user_id = ? AND state = 'pending'",
            params![self.user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether any entry, pending or failed, exists for the entity.
    pub fn has_queue_entries_for(&self, entity_type: EntityType, entity_id: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sync_queue WHERE user_id = ? AND entity_type = ? AND entity_id = ?",
            params![self.user_id, entity_type.as_str(), entity_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Ids of entities of `entity_type` with any queue entry.
    pub fn queued_entity_ids(&self, entity_type: EntityType) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_id FROM sync_queue WHERE user_id = ? AND entity_type = ?",
        )?;
        let ids = stmt
            .query_map(params![self.user_id, entity_type.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Removes an acknowledged entry. Returns whether it existed.
    pub fn remove_entry(&self, seq: i64) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE user_id = ? AND seq = ?",
            params![self.user_id, seq],
        )?;
        Ok(removed > 0)
    }

    /// Bumps the attempt counter after a transient failure. The entry stays
    /// pending at its position.
    pub fn record_attempt_failure(&self, seq: i64, error: &str) -> StorageResult<()> {
        self.update_entry(
            seq,
            "UPDATE sync_queue SET attempts = attempts + 1, last_error = ? WHERE user_id = ? AND seq = ?",
            error,
        )
    }

    /// Parks an entry the remote permanently rejected.
    pub fn mark_failed(&self, seq: i64, error: &str) -> StorageResult<()> {
        self.update_entry(
            seq,
            "UPDATE sync_queue SET state = 'failed', attempts = attempts + 1, last_error = ? \
             WHERE user_id = ? AND seq = ?",
            error,
        )
    }

    /// Moves a failed entry back to pending at its original position.
    pub fn retry_failed(&self, seq: i64) -> StorageResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sync_queue SET state = 'pending', attempts = 0, last_error = NULL \
             WHERE user_id = ? AND seq = ? AND state = 'failed'",
            params![self.user_id, seq],
        )?;
        if updated == 0 {
            return Err(StorageError::QueueEntryNotFound(seq));
        }
        Ok(())
    }

    /// Drops a failed entry for good.
    pub fn discard_failed(&self, seq: i64) -> StorageResult<SyncQueueEntry> {
        let entry = self
            .queue_entry(seq)?
            .filter(|e| e.state == QueueState::Failed)
            .ok_or(StorageError::QueueEntryNotFound(seq))?;
        self.remove_entry(seq)?;
        Ok(entry)
    }

    fn update_entry(&self, seq: i64, sql: &str, error: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(sql, params![error, self.user_id, seq])?;
        if updated == 0 {
            return Err(StorageError::QueueEntryNotFound(seq));
        }
        Ok(())
    }

    fn entries_in_state(&self, state: Option<QueueState>) -> StorageResult<Vec<SyncQueueEntry>> {
        let conn = self.lock()?;
        let raws = match state {
            Some(state) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE user_id = ? AND state = ? ORDER BY seq"
                ))?;
                let rows = stmt
                    .query_map(params![self.user_id, state.as_str()], read_raw)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE user_id = ? ORDER BY seq"
                ))?;
                let rows = stmt
                    .query_map(params![self.user_id], read_raw)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        drop(conn);
        raws.into_iter().map(from_raw).collect()
    }
}

fn entries_for(
    conn: &Connection,
    user_id: &str,
    entity_type: EntityType,
    entity_id: &str,
) -> StorageResult<Vec<(i64, SyncAction, QueueState)>> {
    let mut stmt = conn.prepare(
        "SELECT seq, action, state FROM sync_queue \
         WHERE user_id = ? AND entity_type = ? AND entity_id = ? ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![user_id, entity_type.as_str(), entity_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(seq, action, state)| {
            Ok((
                seq,
                action.parse().map_err(StorageError::Corrupt)?,
                state.parse().map_err(StorageError::Corrupt)?,
            ))
        })
        .collect()
}

fn next_seq(conn: &Connection, user_id: &str) -> StorageResult<i64> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(seq)
}

fn append(
    conn: &Connection,
    user_id: &str,
    seq: i64,
    entry: &NewQueueEntry,
    payload: Option<&str>,
    now_millis: i64,
) -> StorageResult<i64> {
    conn.execute(
        r#"
        INSERT INTO sync_queue (
            user_id, seq, action, entity_type, entity_id, payload, enqueued_at, attempts, state
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'pending')
        "#,
        params![
            user_id,
            seq,
            entry.action.as_str(),
            entry.entity_type.as_str(),
            entry.entity_id,
            payload,
            now_millis,
        ],
    )?;
    Ok(seq)
}

fn read_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn from_raw(raw: RawEntry) -> StorageResult<SyncQueueEntry> {
    let (seq, action, entity_type, entity_id, payload, enqueued_at, attempts, last_error, state) =
        raw;
    let payload = payload
        .map(|json| serde_json::from_str::<EncryptedRecord>(&json))
        .transpose()?;
    Ok(SyncQueueEntry {
        seq,
        action: action.parse().map_err(StorageError::Corrupt)?,
        entity_type: entity_type.parse().map_err(StorageError::Corrupt)?,
        entity_id,
        payload,
        enqueued_at,
        attempts: attempts.max(0) as u32,
        last_error,
        state: state.parse().map_err(StorageError::Corrupt)?,
    })
}
