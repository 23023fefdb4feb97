//! Entity pools.
//!
//! A pool is a named partition holding a [`ComponentStore`] and the
//! canonical [`EntityRef`] handles of the entities assigned to it. Pools
//! are passive storage: id allocation, routing and notification fan-out
//! all live on the [`crate::EntityManager`], which owns every pool.

use std::any::TypeId;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::component::Component;
use crate::id::EntityId;
use crate::reference::EntityRef;
use crate::store::ComponentStore;

/// Handle to one of the manager's pools.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PoolId {
    /// Entities not tied to any specific world or sector.
    Global,
    /// Entities that simulate independent of chunk loading.
    Sector,
    /// One pool per loaded game world.
    World(u32),
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolId::Global => write!(f, "global"),
            PoolId::Sector => write!(f, "sector"),
            PoolId::World(index) => write!(f, "world[{index}]"),
        }
    }
}

/// A partition of the entity space.
pub struct EntityPool {
    name: String,
    refs: FxHashMap<EntityId, EntityRef>,
    store: ComponentStore,
}

impl EntityPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            refs: FxHashMap::default(),
            store: ComponentStore::new(),
        }
    }

    /// The pool's name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pool's component store.
    #[must_use]
    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    /// Mutable access to the component store.
    pub fn store_mut(&mut self) -> &mut ComponentStore {
        &mut self.store
    }

    /// Whether the id is attached to this pool.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.refs.contains_key(&id)
    }

    /// The canonical reference for an attached id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<EntityRef> {
        self.refs.get(&id).cloned()
    }

    /// Attach a reference and its components. Fires no events; the caller
    /// decides whether this is a fresh or relocated entity.
    pub fn attach(&mut self, entity: EntityRef, components: Vec<Box<dyn Component>>) {
        let id = entity.id();
        for component in components {
            self.store.put(id, component);
        }
        self.refs.insert(id, entity);
    }

    /// Detach an id: take its reference and components out of this pool
    /// without invalidating anything or firing events. Used exclusively to
    /// relocate an entity to a different pool.
    pub fn detach(&mut self, id: EntityId) -> Option<(EntityRef, Vec<Box<dyn Component>>)> {
        let entity = self.refs.remove(&id)?;
        let components = self.store.remove_entity(id);
        Some((entity, components))
    }

    /// Drop an id's reference (invalidating it) and its components.
    /// The destruction-notification dance is the manager's job.
    pub(crate) fn evict(&mut self, id: EntityId) {
        if let Some(entity) = self.refs.remove(&id) {
            entity.invalidate();
        }
        self.store.remove_entity(id);
    }

    /// References of every entity attached to this pool.
    #[must_use]
    pub fn all_entities(&self) -> Vec<EntityRef> {
        self.refs.values().cloned().collect()
    }

    /// References of entities carrying all of the given component types.
    #[must_use]
    pub fn entities_with(&self, types: &[TypeId]) -> Vec<EntityRef> {
        let Some((prime, rest)) = types.split_first() else {
            return self.all_entities();
        };
        self.store
            .iter_type(*prime)
            .filter(|(id, _)| rest.iter().all(|ty| self.store.contains(*id, *ty)))
            .filter_map(|(id, _)| self.refs.get(&id).cloned())
            .collect()
    }

    /// Count of entities carrying all of the given component types.
    #[must_use]
    pub fn count_with(&self, types: &[TypeId]) -> usize {
        let Some((prime, rest)) = types.split_first() else {
            return self.refs.len();
        };
        self.store
            .iter_type(*prime)
            .filter(|(id, _)| rest.iter().all(|ty| self.store.contains(*id, *ty)))
            .count()
    }

    /// Number of entities attached to this pool.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.refs.len()
    }

    /// Invalidate every reference and drop all storage.
    pub fn clear(&mut self) {
        for entity in self.refs.values() {
            entity.invalidate();
        }
        self.refs.clear();
        self.store.clear();
    }
}

impl fmt::Debug for EntityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPool")
            .field("name", &self.name)
            .field("entities", &self.refs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrene_entity_derive::Component;

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Health {
        value: i32,
    }

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Mass {
        kg: f32,
    }

    fn pool_with(id: u64, components: Vec<Box<dyn Component>>) -> EntityPool {
        let mut pool = EntityPool::new("test");
        pool.attach(EntityRef::new(EntityId::from_raw(id)), components);
        pool
    }

    #[test]
    fn attach_detach_round_trip() {
        let mut pool = pool_with(1, vec![Box::new(Health { value: 5 })]);
        assert!(pool.contains(EntityId::from_raw(1)));

        let (entity, components) = pool.detach(EntityId::from_raw(1)).unwrap();
        assert_eq!(entity.id(), EntityId::from_raw(1));
        assert!(entity.is_valid_handle());
        assert_eq!(components.len(), 1);
        assert!(!pool.contains(EntityId::from_raw(1)));
        assert!(pool.store().is_empty());
    }

    #[test]
    fn evict_invalidates() {
        let mut pool = pool_with(1, vec![Box::new(Health { value: 5 })]);
        let entity = pool.entity(EntityId::from_raw(1)).unwrap();
        pool.evict(EntityId::from_raw(1));
        assert!(!entity.is_valid_handle());
        assert!(pool.store().is_empty());
    }

    #[test]
    fn filtered_enumeration() {
        let mut pool = EntityPool::new("test");
        pool.attach(
            EntityRef::new(EntityId::from_raw(1)),
            vec![Box::new(Health { value: 1 }), Box::new(Mass { kg: 2.0 })],
        );
        pool.attach(
            EntityRef::new(EntityId::from_raw(2)),
            vec![Box::new(Health { value: 2 })],
        );

        let both = [TypeId::of::<Health>(), TypeId::of::<Mass>()];
        assert_eq!(pool.count_with(&both), 1);
        assert_eq!(
            pool.entities_with(&both)[0].id(),
            EntityId::from_raw(1)
        );
        assert_eq!(pool.count_with(&[TypeId::of::<Health>()]), 2);
        assert_eq!(pool.count_with(&[]), 2);
    }
}
