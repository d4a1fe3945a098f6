//! Purpose: Identity map from (kind, remote id) to the one live entity for that id.
//! Exports: `Entity`, `EntityKey`, `EntityRef`, `EntityCache`.
//! Role: Canonical owner of entity state; proxies read through it.
//! Invariants: At most one live `Entity` per key; upserts merge in place.
//! Invariants: Merges overwrite present fields and leave absent fields untouched.
//! Invariants: No eviction or TTL happens unless a caller asks for it.
use crate::core::error::{Error, ErrorKind};
use crate::core::payload::{EntityKind, RawPayload};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type EntityRef = Arc<RwLock<Entity>>;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    kind: EntityKind,
    id: String,
    fields: Map<String, Value>,
    revision: u64,
}

impl Entity {
    fn new(kind: EntityKind, id: String) -> Self {
        Self {
            kind,
            id,
            fields: Map::new(),
            revision: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bumped once per merge that changed at least one field.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_payload(&self) -> RawPayload {
        RawPayload::from_map(self.fields.clone())
    }

    /// Applies `payload` field by field; returns whether anything changed.
    pub fn merge(&mut self, payload: RawPayload) -> bool {
        let mut changed = false;
        for (key, value) in payload {
            if self.fields.get(&key) != Some(&value) {
                self.fields.insert(key, value);
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
        changed
    }
}

/// Shared handle to one client's identity map. Clones see the same entries.
#[derive(Clone, Default)]
pub struct EntityCache {
    inner: Arc<Mutex<HashMap<EntityKey, EntityRef>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the entity for `(kind, id)` or merges into the live one.
    pub fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        payload: RawPayload,
    ) -> Result<EntityRef, Error> {
        if id.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("entity id must not be empty"));
        }
        if let Some(payload_id) = payload.id(kind) {
            if payload_id != id {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "{kind} payload id `{payload_id}` does not match `{id}`"
                )));
            }
        }

        let entity = {
            let mut map = self.map();
            map.entry(EntityKey::new(kind, id))
                .or_insert_with(|| Arc::new(RwLock::new(Entity::new(kind, id.to_string()))))
                .clone()
        };
        let changed = write_entity(&entity).merge(payload);
        if changed {
            tracing::trace!(kind = %kind, id, "entity merged");
        }
        Ok(entity)
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Result<EntityRef, Error> {
        self.map()
            .get(&EntityKey::new(kind, id))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::CacheMiss).with_message(format!("no cached {kind} `{id}`"))
            })
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.map().contains_key(&EntityKey::new(kind, id))
    }

    /// Drops the cache's strong reference; proxies then see a miss until re-fetch.
    pub fn evict(&self, kind: EntityKind, id: &str) -> bool {
        self.map().remove(&EntityKey::new(kind, id)).is_some()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn clear(&self) {
        self.map().clear();
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.map().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn map(&self) -> MutexGuard<'_, HashMap<EntityKey, EntityRef>> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

pub(crate) fn read_entity(entity: &EntityRef) -> RwLockReadGuard<'_, Entity> {
    entity.read().unwrap_or_else(|poison| poison.into_inner())
}

pub(crate) fn write_entity(entity: &EntityRef) -> RwLockWriteGuard<'_, Entity> {
    entity.write().unwrap_or_else(|poison| poison.into_inner())
}
