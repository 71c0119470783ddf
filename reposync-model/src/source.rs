//! The host content store contract.

use reposync_types::EntityKey;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::entity::{Entity, EntityPayload};
use crate::error::{CodecError, CodecResult};

/// What the sync engine needs from the CMS that owns the content.
///
/// Implementations map their own ids and storage onto (type, name) keys.
pub trait EntitySource: Send + Sync {
    /// Enumerates every entity of `entity_type`.
    fn list_entities(&self, entity_type: &str) -> CodecResult<Vec<Entity>>;

    /// Looks up one entity by its unique name within `entity_type`.
    fn get_entity_by_name(&self, entity_type: &str, name: &str) -> CodecResult<Option<Entity>>;

    /// Creates or replaces the entity with the same key.
    fn import_entity(&self, entity: Entity) -> CodecResult<()>;

    /// Deletes an entity. Returns false if it did not exist.
    fn delete_entity(&self, entity_type: &str, name: &str) -> CodecResult<bool>;
}

/// An [`EntitySource`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryEntitySource {
    entities: RwLock<BTreeMap<EntityKey, EntityPayload>>,
}

impl InMemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities across all types.
    pub fn len(&self) -> usize {
        self.entities.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CodecError {
        CodecError::Source("in-memory entity store lock poisoned".to_string())
    }
}

impl EntitySource for InMemoryEntitySource {
    fn list_entities(&self, entity_type: &str) -> CodecResult<Vec<Entity>> {
        let entities = self.entities.read().map_err(|_| Self::poisoned())?;
        Ok(entities
            .iter()
            .filter(|(key, _)| key.entity_type == entity_type)
            .map(|(key, payload)| Entity {
                key: key.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    fn get_entity_by_name(&self, entity_type: &str, name: &str) -> CodecResult<Option<Entity>> {
        let key = EntityKey::new(entity_type, name)?;
        let entities = self.entities.read().map_err(|_| Self::poisoned())?;
        Ok(entities.get(&key).map(|payload| Entity {
            key: key.clone(),
            payload: payload.clone(),
        }))
    }

    fn import_entity(&self, entity: Entity) -> CodecResult<()> {
        let mut entities = self.entities.write().map_err(|_| Self::poisoned())?;
        entities.insert(entity.key, entity.payload);
        Ok(())
    }

    fn delete_entity(&self, entity_type: &str, name: &str) -> CodecResult<bool> {
        let key = EntityKey::new(entity_type, name)?;
        let mut entities = self.entities.write().map_err(|_| Self::poisoned())?;
        Ok(entities.remove(&key).is_some())
    }
}
