//! In-memory optimistic entity collection.
//!
//! Holds decrypted entities for the unlocked session. Mutations land here
//! first, before the cache or the remote has seen them; entities whose
//! latest mutation has not been acknowledged are flagged unsynced.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use strongbox_types::{Entity, EntityType};

type Key = (EntityType, String);

#[derive(Default)]
struct Inner {
    entities: HashMap<Key, Entity>,
    unsynced: HashSet<Key>,
}

#[derive(Default)]
pub struct MemoryState {
    inner: RwLock<Inner>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, entity: Entity) {
        let key = (entity.entity_type(), entity.id().to_string());
        self.write().entities.insert(key, entity);
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Entity> {
        self.read()
            .entities
            .get(&(entity_type, id.to_string()))
            .cloned()
    }

    pub fn mark_unsynced(&self, entity_type: EntityType, id: &str) {
        self.write().unsynced.insert((entity_type, id.to_string()));
    }

    pub fn mark_synced(&self, entity_type: EntityType, id: &str) {
        self.write().unsynced.remove(&(entity_type, id.to_string()));
    }

    pub fn is_unsynced(&self, entity_type: EntityType, id: &str) -> bool {
        self.read().unsynced.contains(&(entity_type, id.to_string()))
    }

    /// Unsynced entities of one type, tombstones included.
    pub fn unsynced_of(&self, entity_type: EntityType) -> Vec<Entity> {
        let inner = self.read();
        inner
            .unsynced
            .iter()
            .filter(|(t, _)| *t == entity_type)
            .filter_map(|key| inner.entities.get(key).cloned())
            .collect()
    }

    /// Every entity of one type, tombstones included.
    pub fn of_type(&self, entity_type: EntityType) -> Vec<Entity> {
        self.read()
            .entities
            .iter()
            .filter(|((t, _), _)| *t == entity_type)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Replaces every entity of `entity_type` with `entities`, except those
    /// still flagged unsynced, which keep their optimistic version.
    pub fn replace_type(&self, entity_type: EntityType, entities: Vec<Entity>) {
        let mut inner = self.write();
        let Inner {
            entities: current,
            unsynced,
        } = &mut *inner;
        current.retain(|key, _| key.0 != entity_type || unsynced.contains(key));
        for entity in entities {
            let key = (entity_type, entity.id().to_string());
            if !unsynced.contains(&key) {
                current.insert(key, entity);
            }
        }
    }

    /// Drops tombstones deleted before `cutoff_millis` that are not
    /// waiting on the remote.
    pub fn forget_tombstones(&self, cutoff_millis: i64) {
        let mut inner = self.write();
        let Inner { entities, unsynced } = &mut *inner;
        entities.retain(|key, entity| {
            unsynced.contains(key) || entity.deleted_at().is_none_or(|at| at >= cutoff_millis)
        });
    }

    pub fn len(&self) -> usize {
        self.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every decrypted entity. Called on lock.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entities.clear();
        inner.unsynced.clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_types::Vault;

    fn vault(id: &str, name: &str) -> Entity {
        let mut v = Vault::new(name);
        v.id = id.into();
        Entity::Vault(v)
    }

    #[test]
    fn replace_keeps_unsynced_versions() {
        let state = MemoryState::new();
        state.apply(vault("a", "local edit"));
        state.mark_unsynced(EntityType::Vault, "a");
        state.apply(vault("b", "old"));

        state.replace_type(
            EntityType::Vault,
            vec![vault("a", "server"), vault("c", "new")],
        );

        match state.get(EntityType::Vault, "a").unwrap() {
            Entity::Vault(v) => assert_eq!(v.name, "local edit"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(state.get(EntityType::Vault, "b").is_none());
        assert!(state.get(EntityType::Vault, "c").is_some());
    }

    #[test]
    fn clear_forgets_everything() {
        let state = MemoryState::new();
        state.apply(vault("a", "x"));
        state.mark_unsynced(EntityType::Vault, "a");
        state.clear();
        assert!(state.is_empty());
        assert!(!state.is_unsynced(EntityType::Vault, "a"));
    }

    #[test]
    fn forget_tombstones_respects_cutoff_and_unsynced() {
        let state = MemoryState::new();
        let mut old = Vault::new("old");
        old.id = "old".into();
        old.deleted_at = Some(100);
        let mut pending = Vault::new("pending");
        pending.id = "pending".into();
        pending.deleted_at = Some(100);
        state.apply(Entity::Vault(old));
        state.apply(Entity::Vault(pending));
        state.mark_unsynced(EntityType::Vault, "pending");
        state.apply(vault("live", "live"));

        state.forget_tombstones(500);
        assert!(state.get(EntityType::Vault, "old").is_none());
        assert!(state.get(EntityType::Vault, "pending").is_some());
        assert!(state.get(EntityType::Vault, "live").is_some());
    }
}
