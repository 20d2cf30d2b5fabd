//! Activity log and device registry types. Non-sensitive metadata only.

use crate::record::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockMethod {
    Pin,
    Biometric,
}

impl UnlockMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockMethod::Pin => "pin",
            UnlockMethod::Biometric => "biometric",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    VaultSetup,
    Unlock,
    UnlockFailed,
    Lock,
    Logout,
    PinChanged,
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    IntegrityAlert,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::VaultSetup => "vault_setup",
            ActivityAction::Unlock => "unlock",
            ActivityAction::UnlockFailed => "unlock_failed",
            ActivityAction::Lock => "lock",
            ActivityAction::Logout => "logout",
            ActivityAction::PinChanged => "pin_changed",
            ActivityAction::EntityCreated => "entity_created",
            ActivityAction::EntityUpdated => "entity_updated",
            ActivityAction::EntityDeleted => "entity_deleted",
            ActivityAction::IntegrityAlert => "integrity_alert",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "vault_setup" => ActivityAction::VaultSetup,
            "unlock" => ActivityAction::Unlock,
            "unlock_failed" => ActivityAction::UnlockFailed,
            "lock" => ActivityAction::Lock,
            "logout" => ActivityAction::Logout,
            "pin_changed" => ActivityAction::PinChanged,
            "entity_created" => ActivityAction::EntityCreated,
            "entity_updated" => ActivityAction::EntityUpdated,
            "entity_deleted" => ActivityAction::EntityDeleted,
            "integrity_alert" => ActivityAction::IntegrityAlert,
            other => return Err(format!("unknown activity action: {other}")),
        })
    }
}

/// One activity log row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub action: ActivityAction,
    /// Device descriptor (device id) the action happened on.
    pub device_id: String,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub detail: Option<String>,
    pub created_at: i64,
}

impl ActivityEntry {
    pub fn new(action: ActivityAction, device_id: impl Into<String>, at: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            action,
            device_id: device_id.into(),
            entity_type: None,
            entity_id: None,
            detail: None,
            created_at: at,
        }
    }

    pub fn for_entity(mut self, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A device registered for this user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub platform: String,
    pub registered_at: i64,
    pub last_seen_at: i64,
}
