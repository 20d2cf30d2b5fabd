//! Encrypted record shape shared by the cache, the queue, and the remote.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synced entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Vault,
    Item,
    Category,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Vault, EntityType::Item, EntityType::Category];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Vault => "vault",
            EntityType::Item => "item",
            EntityType::Category => "category",
        }
    }

    /// Remote collection name for this entity type.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Vault => "vaults",
            EntityType::Item => "items",
            EntityType::Category => "categories",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vault" => Ok(EntityType::Vault),
            "item" => Ok(EntityType::Item),
            "category" => Ok(EntityType::Category),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// A vault, item, or category as persisted locally and exchanged with the
/// remote. `ciphertext` carries every sensitive field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: String,
    pub entity_type: EntityType,
    /// Cleartext type/enumeration tag (`vault`, `category`, or the item kind).
    pub type_tag: String,
    #[serde(default)]
    pub vault_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Keyed verification tag over the decrypted payload, hex-encoded.
    pub integrity_tag: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl EncryptedRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Query filter for cached records.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    pub entity_type: Option<EntityType>,
    pub vault_id: Option<String>,
    pub category_id: Option<String>,
    /// Include tombstones (soft-deleted records).
    pub include_deleted: bool,
}

impl RecordFilter {
    pub fn of_type(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn in_vault(mut self, vault_id: impl Into<String>) -> Self {
        self.vault_id = Some(vault_id.into());
        self
    }

    pub fn in_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
