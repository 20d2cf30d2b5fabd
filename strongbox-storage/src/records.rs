//! Encrypted record table.

use crate::cache::UserCache;
use crate::error::{StorageError, StorageResult};
use duckdb::{Connection, params, params_from_iter};
use std::collections::HashSet;
use strongbox_types::{EncryptedRecord, EntityType, RecordFilter};

const RECORD_COLUMNS: &str = "id, entity_type, type_tag, vault_id, category_id, ciphertext, \
                              integrity_tag, created_at, updated_at, deleted_at";

type RawRecord = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Vec<u8>,
    String,
    i64,
    i64,
    Option<i64>,
);

impl UserCache {
    /// Upserts one record.
    ///
    /// Fails with [`StorageError::QuotaExceeded`] when inserting a new record
    /// would exceed the configured per-user quota. Overwriting an existing
    /// record is always allowed.
    pub fn put(&self, record: &EncryptedRecord) -> StorageResult<()> {
        let conn = self.lock()?;
        if let Some(quota) = self.record_quota {
            let exists: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM records WHERE user_id = ? AND entity_type = ? AND id = ?",
                params![self.user_id, record.entity_type.as_str(), record.id],
                |row| row.get(0),
            )?;
            if !exists {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM records WHERE user_id = ?",
                    params![self.user_id],
                    |row| row.get(0),
                )?;
                if count as usize >= quota {
                    return Err(StorageError::QuotaExceeded { quota });
                }
            }
        }
        upsert(&conn, &self.user_id, record)
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> StorageResult<Option<EncryptedRecord>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE user_id = ? AND entity_type = ? AND id = ?"
            ),
            params![self.user_id, entity_type.as_str(), id],
            read_raw,
        );
        match result {
            Ok(raw) => Ok(Some(from_raw(raw)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns records matching `filter`, newest first. Tombstones are
    /// excluded unless the filter asks for them.
    pub fn get_all(&self, filter: &RecordFilter) -> StorageResult<Vec<EncryptedRecord>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE user_id = ?");
        let mut values = vec![self.user_id.clone()];
        if let Some(entity_type) = filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            values.push(entity_type.as_str().to_string());
        }
        if let Some(vault_id) = &filter.vault_id {
            sql.push_str(" AND vault_id = ?");
            values.push(vault_id.clone());
        }
        if let Some(category_id) = &filter.category_id {
            sql.push_str(" AND category_id = ?");
            values.push(category_id.clone());
        }
        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        sql.push_str(" ORDER BY updated_at DESC, id");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(values.iter()), read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        raws.into_iter().map(from_raw).collect()
    }

    /// Rebuilds every record of `entity_type` from an authoritative
    /// snapshot: incoming records overwrite local ones and local records
    /// absent from the snapshot are removed. Ids in `preserve` are left
    /// untouched on both counts.
    ///
    /// Returns the number of records written.
    pub fn replace_all(
        &self,
        entity_type: EntityType,
        records: &[EncryptedRecord],
        preserve: &HashSet<String>,
    ) -> StorageResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM records WHERE user_id = ? AND entity_type = ?")?;
            let ids = stmt
                .query_map(params![self.user_id, entity_type.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            ids
        };

        let incoming: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        for id in existing
            .iter()
            .filter(|id| !incoming.contains(id.as_str()) && !preserve.contains(*id))
        {
            tx.execute(
                "DELETE FROM records WHERE user_id = ? AND entity_type = ? AND id = ?",
                params![self.user_id, entity_type.as_str(), id],
            )?;
        }

        let mut written = 0;
        for record in records {
            if record.entity_type != entity_type || preserve.contains(&record.id) {
                continue;
            }
            upsert(&tx, &self.user_id, record)?;
            written += 1;
        }

        tx.commit()?;
        Ok(written)
    }

    /// Physically removes tombstones deleted before `cutoff_millis`.
    /// Records that still have queue entries are kept.
    pub fn purge_tombstones(&self, cutoff_millis: i64) -> StorageResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            r#"
            DELETE FROM records
            WHERE user_id = ?
              AND deleted_at IS NOT NULL
              AND deleted_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue q
                  WHERE q.user_id = records.user_id
                    AND q.entity_type = records.entity_type
                    AND q.entity_id = records.id
              )
            "#,
            params![self.user_id, cutoff_millis],
        )?;
        Ok(removed)
    }

    pub fn record_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE user_id = ?",
            params![self.user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn upsert(conn: &Connection, user_id: &str, record: &EncryptedRecord) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO records (
            user_id, entity_type, id, type_tag, vault_id, category_id,
            ciphertext, integrity_tag, created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            user_id,
            record.entity_type.as_str(),
            record.id,
            record.type_tag,
            record.vault_id,
            record.category_id,
            record.ciphertext,
            record.integrity_tag,
            record.created_at,
            record.updated_at,
            record.deleted_at,
        ],
    )?;
    Ok(())
}

fn read_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawRecord> {
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
        row.get(9)?,
    ))
}

fn from_raw(raw: RawRecord) -> StorageResult<EncryptedRecord> {
    let (
        id,
        entity_type,
        type_tag,
        vault_id,
        category_id,
        ciphertext,
        integrity_tag,
        created_at,
        updated_at,
        deleted_at,
    ) = raw;
    let entity_type = entity_type
        .parse::<EntityType>()
        .map_err(StorageError::Corrupt)?;
    Ok(EncryptedRecord {
        id,
        entity_type,
        type_tag,
        vault_id,
        category_id,
        ciphertext,
        integrity_tag,
        created_at,
        updated_at,
        deleted_at,
    })
}
