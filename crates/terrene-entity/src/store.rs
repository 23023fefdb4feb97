//! Per-pool component table.
//!
//! A double map keyed type-first: component type -> entity id -> instance.
//! Point lookups are O(1); iterating one type touches only that type's map.
//! Iteration order within an entity's component set is map order, which is
//! stable as long as the store is not mutated in between.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::component::Component;
use crate::id::EntityId;

/// Component storage for one entity pool.
#[derive(Default)]
pub struct ComponentStore {
    tables: FxHashMap<TypeId, FxHashMap<EntityId, Box<dyn Component>>>,
}

impl ComponentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup by entity and component type.
    #[must_use]
    pub fn get(&self, id: EntityId, ty: TypeId) -> Option<&dyn Component> {
        self.tables.get(&ty)?.get(&id).map(|c| &**c)
    }

    /// Mutable point lookup.
    pub fn get_mut(&mut self, id: EntityId, ty: TypeId) -> Option<&mut (dyn Component + 'static)> {
        self.tables.get_mut(&ty)?.get_mut(&id).map(|c| &mut **c)
    }

    /// Typed point lookup.
    #[must_use]
    pub fn get_typed<T: Component>(&self, id: EntityId) -> Option<&T> {
        self.get(id, TypeId::of::<T>())?.downcast_ref::<T>()
    }

    /// Insert or replace a component, returning the previous instance.
    pub fn put(&mut self, id: EntityId, component: Box<dyn Component>) -> Option<Box<dyn Component>> {
        let ty = component.as_any().type_id();
        self.tables.entry(ty).or_default().insert(id, component)
    }

    /// Remove one component, returning it.
    pub fn remove(&mut self, id: EntityId, ty: TypeId) -> Option<Box<dyn Component>> {
        let table = self.tables.get_mut(&ty)?;
        let removed = table.remove(&id);
        if table.is_empty() {
            self.tables.remove(&ty);
        }
        removed
    }

    /// Remove every component of an entity, returning them.
    pub fn remove_entity(&mut self, id: EntityId) -> Vec<Box<dyn Component>> {
        let mut removed = Vec::new();
        self.tables.retain(|_, table| {
            if let Some(component) = table.remove(&id) {
                removed.push(component);
            }
            !table.is_empty()
        });
        removed
    }

    /// Whether the entity has a component of the given type.
    #[must_use]
    pub fn contains(&self, id: EntityId, ty: TypeId) -> bool {
        self.tables.get(&ty).is_some_and(|t| t.contains_key(&id))
    }

    /// Iterate all components of one entity.
    pub fn iter_entity(&self, id: EntityId) -> impl Iterator<Item = &dyn Component> {
        self.tables
            .values()
            .filter_map(move |table| table.get(&id).map(|c| &**c))
    }

    /// Component types present on one entity.
    #[must_use]
    pub fn types_of(&self, id: EntityId) -> Vec<TypeId> {
        self.tables
            .iter()
            .filter(|(_, table)| table.contains_key(&id))
            .map(|(ty, _)| *ty)
            .collect()
    }

    /// Iterate all `(entity, component)` pairs of one type.
    pub fn iter_type(&self, ty: TypeId) -> impl Iterator<Item = (EntityId, &dyn Component)> {
        self.tables
            .get(&ty)
            .into_iter()
            .flat_map(|table| table.iter().map(|(id, c)| (*id, &**c)))
    }

    /// Every entity id with at least one component, deduplicated.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = Vec::new();
        let mut seen = rustc_hash::FxHashSet::default();
        for table in self.tables.values() {
            for id in table.keys() {
                if seen.insert(*id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    /// Number of stored instances of one type.
    #[must_use]
    pub fn count_of(&self, ty: TypeId) -> usize {
        self.tables.get(&ty).map_or(0, |table| table.len())
    }

    /// Number of components on one entity.
    #[must_use]
    pub fn component_count(&self, id: EntityId) -> usize {
        self.tables
            .values()
            .filter(|table| table.contains_key(&id))
            .count()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Whether the store holds no components at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
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
    struct Tag {
        name: String,
    }

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn put_get_remove() {
        let mut store = ComponentStore::new();
        let prev = store.put(id(1), Box::new(Health { value: 100 }));
        assert!(prev.is_none());

        assert_eq!(
            store.get_typed::<Health>(id(1)),
            Some(&Health { value: 100 })
        );
        assert!(store.contains(id(1), TypeId::of::<Health>()));

        // replace returns the previous instance
        let prev = store.put(id(1), Box::new(Health { value: 50 }));
        assert_eq!(
            prev.unwrap().downcast_ref::<Health>(),
            Some(&Health { value: 100 })
        );

        let removed = store.remove(id(1), TypeId::of::<Health>()).unwrap();
        assert_eq!(removed.downcast_ref::<Health>(), Some(&Health { value: 50 }));
        assert!(store.get(id(1), TypeId::of::<Health>()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn per_entity_iteration() {
        let mut store = ComponentStore::new();
        store.put(id(1), Box::new(Health { value: 1 }));
        store.put(id(1), Box::new(Tag { name: "a".into() }));
        store.put(id(2), Box::new(Health { value: 2 }));

        assert_eq!(store.iter_entity(id(1)).count(), 2);
        assert_eq!(store.component_count(id(2)), 1);
        assert_eq!(store.types_of(id(1)).len(), 2);

        let removed = store.remove_entity(id(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(store.iter_entity(id(1)).count(), 0);
        assert_eq!(store.count_of(TypeId::of::<Health>()), 1);
    }

    #[test]
    fn per_type_iteration() {
        let mut store = ComponentStore::new();
        for raw in 1..=3 {
            store.put(id(raw), Box::new(Health { value: raw as i32 }));
        }
        store.put(id(9), Box::new(Tag { name: "x".into() }));

        let mut pairs: Vec<(EntityId, i32)> = store
            .iter_type(TypeId::of::<Health>())
            .map(|(e, c)| (e, c.downcast_ref::<Health>().unwrap().value))
            .collect();
        pairs.sort_unstable_by_key(|(e, _)| *e);
        assert_eq!(
            pairs,
            vec![(id(1), 1), (id(2), 2), (id(3), 3)]
        );

        let mut ids = store.entity_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![id(1), id(2), id(3), id(9)]);
    }
}
