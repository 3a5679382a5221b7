//! Persistence context: the session's identity map plus snapshot store.
//!
//! Every tracked entity has exactly one cache entry and two snapshot entries
//! (simple columns and to-one foreign keys), all created by the same `put`.
//! Snapshots are taken once per key; putting an already tracked entity again
//! leaves the baseline untouched, so later mutations still read as dirty.
//!
//! All three maps live behind one mutex. Entity state is never read while
//! the mutex is held: lazy suppliers triggered by reading an entity may call
//! back into the context.

use bibernate_core::{
    Entity, EntityKey, EntityPropertySnapshot, EntityRef, EntityRelationSnapshot, Error,
    ManagedEntity, Result, downcast_entity, same_relations,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ContextState {
    first_level_cache: HashMap<EntityKey, Arc<dyn ManagedEntity>>,
    entity_snapshots: HashMap<EntityKey, Vec<EntityPropertySnapshot>>,
    relation_snapshots: HashMap<EntityKey, Vec<EntityRelationSnapshot>>,
}

/// Per-session identity map and dirty-checking baseline.
#[derive(Default)]
pub struct PersistenceContext {
    state: Mutex<ContextState>,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("entities", &self.len())
            .finish()
    }
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracked instance for `key`, typed.
    pub fn get_entity<E: Entity>(&self, key: &EntityKey) -> Option<EntityRef<E>> {
        self.get_managed(key).and_then(downcast_entity::<E>)
    }

    /// The tracked instance for `key`.
    pub fn get_managed(&self, key: &EntityKey) -> Option<Arc<dyn ManagedEntity>> {
        self.state.lock().first_level_cache.get(key).cloned()
    }

    /// Start tracking `entity` unless an instance with the same key is
    /// already tracked. Always returns the entity passed in, which is not
    /// necessarily the tracked one.
    pub fn put(&self, entity: Arc<dyn ManagedEntity>) -> Result<Arc<dyn ManagedEntity>> {
        let key = entity.key()?;
        if key.id().is_null() {
            return Err(Error::entity_query(
                key.entity_type().name(),
                "cannot track an entity without an identifier",
            ));
        }
        if self.contains_key(&key) {
            tracing::trace!(key = %key, "Entity already tracked, keeping snapshot");
            return Ok(entity);
        }

        let properties = entity.property_snapshots()?;
        let relations = entity.relation_snapshots()?;

        let mut state = self.state.lock();
        if !state.first_level_cache.contains_key(&key) {
            tracing::trace!(key = %key, columns = properties.len(), "Tracking entity");
            state
                .first_level_cache
                .insert(key.clone(), Arc::clone(&entity));
            state.entity_snapshots.insert(key.clone(), properties);
            state.relation_snapshots.insert(key, relations);
        }
        Ok(entity)
    }

    /// Whether an instance with the same key as `entity` is tracked.
    pub fn contains(&self, entity: &dyn ManagedEntity) -> Result<bool> {
        Ok(self.contains_key(&entity.key()?))
    }

    pub fn contains_key(&self, key: &EntityKey) -> bool {
        self.state.lock().first_level_cache.contains_key(key)
    }

    /// Stop tracking `entity` and drop its snapshots.
    pub fn delete(&self, entity: &dyn ManagedEntity) -> Result<()> {
        let key = entity.key()?;
        self.remove(&key);
        Ok(())
    }

    /// Stop tracking `key` and drop its snapshots.
    pub fn remove(&self, key: &EntityKey) -> Option<Arc<dyn ManagedEntity>> {
        let mut state = self.state.lock();
        state.entity_snapshots.remove(key);
        state.relation_snapshots.remove(key);
        state.first_level_cache.remove(key)
    }

    /// Whether the tracked instance for `key` differs from its baseline.
    ///
    /// Simple columns are compared positionally. Foreign keys are compared as
    /// an unordered collection, and only for types that own to-one
    /// associations. Untracked keys are never dirty.
    pub fn is_dirty(&self, key: &EntityKey) -> Result<bool> {
        let tracked = {
            let state = self.state.lock();
            state.first_level_cache.get(key).map(|entity| {
                (
                    Arc::clone(entity),
                    state.entity_snapshots.get(key).cloned().unwrap_or_default(),
                    state.relation_snapshots.get(key).cloned().unwrap_or_default(),
                )
            })
        };
        match tracked {
            Some((entity, properties, relations)) => {
                check_dirty(key, entity.as_ref(), &properties, &relations)
            }
            None => Ok(false),
        }
    }

    /// All tracked entities whose state differs from their baseline.
    pub fn dirty_entities(&self) -> Result<Vec<(EntityKey, Arc<dyn ManagedEntity>)>> {
        let tracked: Vec<_> = {
            let state = self.state.lock();
            state
                .first_level_cache
                .iter()
                .map(|(key, entity)| {
                    (
                        key.clone(),
                        Arc::clone(entity),
                        state.entity_snapshots.get(key).cloned().unwrap_or_default(),
                        state.relation_snapshots.get(key).cloned().unwrap_or_default(),
                    )
                })
                .collect()
        };

        let mut dirty = Vec::new();
        for (key, entity, properties, relations) in tracked {
            if check_dirty(&key, entity.as_ref(), &properties, &relations)? {
                dirty.push((key, entity));
            }
        }
        Ok(dirty)
    }

    /// Retake both snapshots of the tracked instance for `key`, making its
    /// current state the new baseline.
    pub fn refresh_snapshot(&self, key: &EntityKey) -> Result<()> {
        let Some(entity) = self.get_managed(key) else {
            return Ok(());
        };
        let properties = entity.property_snapshots()?;
        let relations = entity.relation_snapshots()?;
        let mut state = self.state.lock();
        if state.first_level_cache.contains_key(key) {
            state.entity_snapshots.insert(key.clone(), properties);
            state.relation_snapshots.insert(key.clone(), relations);
        }
        Ok(())
    }

    /// Stop tracking everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.first_level_cache.clear();
        state.entity_snapshots.clear();
        state.relation_snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().first_level_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().first_level_cache.is_empty()
    }
}

fn check_dirty(
    key: &EntityKey,
    entity: &dyn ManagedEntity,
    properties: &[EntityPropertySnapshot],
    relations: &[EntityRelationSnapshot],
) -> Result<bool> {
    let current = entity.property_snapshots()?;
    if current.as_slice() != properties {
        tracing::trace!(key = %key, "Simple columns changed");
        return Ok(true);
    }
    if entity.metadata()?.has_to_one() {
        let current = entity.relation_snapshots()?;
        if !same_relations(&current, relations) {
            tracing::trace!(key = %key, "Foreign keys changed");
            return Ok(true);
        }
    }
    Ok(false)
}
