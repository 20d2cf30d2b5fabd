//! Activity log and device registry.

use crate::cache::UserCache;
use crate::error::{StorageError, StorageResult};
use duckdb::params;
use strongbox_types::{ActivityAction, ActivityEntry, DeviceInfo, EntityType};

type RawActivity = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

impl UserCache {
    pub fn append_activity(&self, entry: &ActivityEntry) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO activity_log (
                user_id, id, action, device_id, entity_type, entity_id, detail, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                self.user_id,
                entry.id,
                entry.action.as_str(),
                entry.device_id,
                entry.entity_type.map(|t| t.as_str()),
                entry.entity_id,
                entry.detail,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent entries first.
    pub fn recent_activity(&self, limit: usize) -> StorageResult<Vec<ActivityEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, action, device_id, entity_type, entity_id, detail, created_at \
             FROM activity_log WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )?;
        let raws = stmt
            .query_map(params![self.user_id, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<RawActivity>, _>>()?;
        drop(stmt);
        drop(conn);

        raws.into_iter()
            .map(
                |(id, action, device_id, entity_type, entity_id, detail, created_at)| {
                    Ok(ActivityEntry {
                        id,
                        action: action.parse::<ActivityAction>().map_err(StorageError::Corrupt)?,
                        device_id,
                        entity_type: entity_type
                            .map(|t| t.parse::<EntityType>())
                            .transpose()
                            .map_err(StorageError::Corrupt)?,
                        entity_id,
                        detail,
                        created_at,
                    })
                },
            )
            .collect()
    }

    /// Registers a device or refreshes its name, platform, and
    /// `last_seen_at`. The original registration time is kept.
    pub fn upsert_device(&self, device: &DeviceInfo) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO devices (user_id, device_id, name, platform, registered_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, device_id) DO UPDATE SET
                name = excluded.name,
                platform = excluded.platform,
                last_seen_at = excluded.last_seen_at
            "#,
            params![
                self.user_id,
                device.device_id,
                device.name,
                device.platform,
                device.registered_at,
                device.last_seen_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_devices(&self) -> StorageResult<Vec<DeviceInfo>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, name, platform, registered_at, last_seen_at \
             FROM devices WHERE user_id = ? ORDER BY registered_at, device_id",
        )?;
        let devices = stmt
            .query_map(params![self.user_id], |row| {
                Ok(DeviceInfo {
                    device_id: row.get(0)?,
                    name: row.get(1)?,
                    platform: row.get(2)?,
                    registered_at: row.get(3)?,
                    last_seen_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }
}
