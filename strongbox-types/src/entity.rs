//! Decrypted entities and their sealed payload schemas.
//!
//! Each entity splits into cleartext metadata (id, parent references,
//! timestamps, type tag) and a sealed part that is serialized, encrypted,
//! and stored as the record ciphertext. The sealed part has one explicit
//! schema per type tag and is validated when a record is opened.

use crate::record::{EncryptedRecord, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Generates a new time-ordered entity id.
pub fn new_entity_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// A decrypted payload did not match the schema its record claims.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed {entity_type} payload: {source}")]
    Malformed {
        entity_type: EntityType,
        #[source]
        source: serde_json::Error,
    },

    #[error("type tag mismatch: record is tagged {tagged}, payload is {actual}")]
    TagMismatch { tagged: String, actual: String },

    #[error("unknown item kind: {0}")]
    UnknownKind(String),

    #[error("item {0} has no vault reference")]
    MissingVault(String),
}

// ============================================================================
// Items
// ============================================================================

/// Cleartext item kind, stored as the record's type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Login,
    SecureNote,
    Card,
    Identity,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Login => "login",
            ItemKind::SecureNote => "secure_note",
            ItemKind::Card => "card",
            ItemKind::Identity => "identity",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(ItemKind::Login),
            "secure_note" => Ok(ItemKind::SecureNote),
            "card" => Ok(ItemKind::Card),
            "identity" => Ok(ItemKind::Identity),
            other => Err(SchemaError::UnknownKind(other.to_string())),
        }
    }
}

/// Kind-specific secret fields of an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPayload {
    Login {
        username: String,
        password: String,
        #[serde(default)]
        urls: Vec<String>,
        #[serde(default)]
        totp_secret: Option<String>,
    },
    SecureNote {
        text: String,
    },
    Card {
        cardholder: String,
        number: String,
        expiry: String,
        cvv: String,
    },
    Identity {
        full_name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
}

impl ItemPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemPayload::Login { .. } => ItemKind::Login,
            ItemPayload::SecureNote { .. } => ItemKind::SecureNote,
            ItemPayload::Card { .. } => ItemKind::Card,
            ItemPayload::Identity { .. } => ItemKind::Identity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub vault_id: String,
    pub category_id: Option<String>,
    pub name: String,
    pub notes: Option<String>,
    pub favorite: bool,
    pub payload: ItemPayload,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Item {
    pub fn new(vault_id: impl Into<String>, name: impl Into<String>, payload: ItemPayload) -> Self {
        Self {
            id: new_entity_id(),
            vault_id: vault_id.into(),
            category_id: None,
            name: name.into(),
            notes: None,
            favorite: false,
            payload,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn kind(&self) -> ItemKind {
        self.payload.kind()
    }
}

#[derive(Serialize, Deserialize)]
struct SealedItem {
    name: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    favorite: bool,
    payload: ItemPayload,
}

// ============================================================================
// Vaults and categories
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vault {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Vault {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            name: name.into(),
            description: None,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SealedVault {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            name: name.into(),
            color: None,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SealedCategory {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

// ============================================================================
// Entity: tagged union over everything that syncs
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Vault(Vault),
    Item(Item),
    Category(Category),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Vault(_) => EntityType::Vault,
            Entity::Item(_) => EntityType::Item,
            Entity::Category(_) => EntityType::Category,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Vault(v) => &v.id,
            Entity::Item(i) => &i.id,
            Entity::Category(c) => &c.id,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Entity::Vault(_) => "vault",
            Entity::Item(i) => i.kind().as_str(),
            Entity::Category(_) => "category",
        }
    }

    pub fn vault_id(&self) -> Option<&str> {
        match self {
            Entity::Item(i) => Some(&i.vault_id),
            _ => None,
        }
    }

    pub fn category_id(&self) -> Option<&str> {
        match self {
            Entity::Item(i) => i.category_id.as_deref(),
            _ => None,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            Entity::Vault(v) => v.created_at,
            Entity::Item(i) => i.created_at,
            Entity::Category(c) => c.created_at,
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            Entity::Vault(v) => v.updated_at,
            Entity::Item(i) => i.updated_at,
            Entity::Category(c) => c.updated_at,
        }
    }

    pub fn deleted_at(&self) -> Option<i64> {
        match self {
            Entity::Vault(v) => v.deleted_at,
            Entity::Item(i) => i.deleted_at,
            Entity::Category(c) => c.deleted_at,
        }
    }

    /// Stamps `updated_at` (and `created_at` on first write).
    pub fn touch(&mut self, now_millis: i64) {
        let (created, updated) = match self {
            Entity::Vault(v) => (&mut v.created_at, &mut v.updated_at),
            Entity::Item(i) => (&mut i.created_at, &mut i.updated_at),
            Entity::Category(c) => (&mut c.created_at, &mut c.updated_at),
        };
        if *created == 0 {
            *created = now_millis;
        }
        *updated = now_millis;
    }

    /// Marks the entity as a tombstone.
    pub fn soft_delete(&mut self, now_millis: i64) {
        let (updated, deleted) = match self {
            Entity::Vault(v) => (&mut v.updated_at, &mut v.deleted_at),
            Entity::Item(i) => (&mut i.updated_at, &mut i.deleted_at),
            Entity::Category(c) => (&mut c.updated_at, &mut c.deleted_at),
        };
        *updated = now_millis;
        *deleted = Some(now_millis);
    }

    /// Applies server-confirmed metadata to this entity.
    pub fn merge_confirmed(&mut self, confirmed: &EncryptedRecord) {
        let (created, updated, deleted) = match self {
            Entity::Vault(v) => (&mut v.created_at, &mut v.updated_at, &mut v.deleted_at),
            Entity::Item(i) => (&mut i.created_at, &mut i.updated_at, &mut i.deleted_at),
            Entity::Category(c) => (&mut c.created_at, &mut c.updated_at, &mut c.deleted_at),
        };
        *created = confirmed.created_at;
        *updated = confirmed.updated_at;
        *deleted = confirmed.deleted_at;
    }

    /// Serializes the sensitive fields for encryption.
    pub fn sealed_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Entity::Vault(v) => serde_json::to_vec(&SealedVault {
                name: v.name.clone(),
                description: v.description.clone(),
            }),
            Entity::Item(i) => serde_json::to_vec(&SealedItem {
                name: i.name.clone(),
                notes: i.notes.clone(),
                favorite: i.favorite,
                payload: i.payload.clone(),
            }),
            Entity::Category(c) => serde_json::to_vec(&SealedCategory {
                name: c.name.clone(),
                color: c.color.clone(),
            }),
        }
    }

    /// Rebuilds an entity from its record metadata and decrypted payload,
    /// validating the payload against the schema for the record's type tag.
    pub fn open(record: &EncryptedRecord, plaintext: &[u8]) -> Result<Entity, SchemaError> {
        let malformed = |source| SchemaError::Malformed {
            entity_type: record.entity_type,
            source,
        };

        match record.entity_type {
            EntityType::Vault => {
                expect_tag(&record.type_tag, "vault")?;
                let sealed: SealedVault = serde_json::from_slice(plaintext).map_err(malformed)?;
                Ok(Entity::Vault(Vault {
                    id: record.id.clone(),
                    name: sealed.name,
                    description: sealed.description,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                    deleted_at: record.deleted_at,
                }))
            }
            EntityType::Category => {
                expect_tag(&record.type_tag, "category")?;
                let sealed: SealedCategory =
                    serde_json::from_slice(plaintext).map_err(malformed)?;
                Ok(Entity::Category(Category {
                    id: record.id.clone(),
                    name: sealed.name,
                    color: sealed.color,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                    deleted_at: record.deleted_at,
                }))
            }
            EntityType::Item => {
                let tagged: ItemKind = record.type_tag.parse()?;
                let sealed: SealedItem = serde_json::from_slice(plaintext).map_err(malformed)?;
                let actual = sealed.payload.kind();
                if actual != tagged {
                    return Err(SchemaError::TagMismatch {
                        tagged: tagged.to_string(),
                        actual: actual.to_string(),
                    });
                }
                let vault_id = record
                    .vault_id
                    .clone()
                    .ok_or_else(|| SchemaError::MissingVault(record.id.clone()))?;
                Ok(Entity::Item(Item {
                    id: record.id.clone(),
                    vault_id,
                    category_id: record.category_id.clone(),
                    name: sealed.name,
                    notes: sealed.notes,
                    favorite: sealed.favorite,
                    payload: sealed.payload,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                    deleted_at: record.deleted_at,
                }))
            }
        }
    }
}

fn expect_tag(tagged: &str, expected: &str) -> Result<(), SchemaError> {
    if tagged == expected {
        Ok(())
    } else {
        Err(SchemaError::TagMismatch {
            tagged: tagged.to_string(),
            actual: expected.to_string(),
        })
    }
}

impl From<Vault> for Entity {
    fn from(v: Vault) -> Self {
        Entity::Vault(v)
    }
}

impl From<Item> for Entity {
    fn from(i: Item) -> Self {
        Entity::Item(i)
    }
}

impl From<Category> for Entity {
    fn from(c: Category) -> Self {
        Entity::Category(c)
    }
}
