//! Entity references.
//!
//! An [`EntityRef`] is an id plus a shared validity flag, nothing more.
//! Existence is a lookup through the [`EntityManager`], never a lifetime
//! guarantee; every operation takes the manager explicitly. Clones of a
//! reference share the flag, so invalidating the canonical handle (on
//! destroy) severs every copy at once. An invalidated reference keeps its
//! last-known id for identification and printing.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::component::Component;
use crate::entity_info::Scope;
use crate::id::EntityId;
use crate::manager::EntityManager;

/// A lazily-resolved handle to an entity.
pub struct EntityRef {
    id: EntityId,
    alive: Rc<Cell<bool>>,
}

impl EntityRef {
    /// Create a live canonical reference. Used by the manager when an
    /// entity enters a pool.
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            id,
            alive: Rc::new(Cell::new(true)),
        }
    }

    /// The inert null reference. Exists for no entity and silently no-ops
    /// all mutators.
    #[must_use]
    pub fn null() -> Self {
        Self {
            id: EntityId::NULL,
            alive: Rc::new(Cell::new(false)),
        }
    }

    /// The entity id. Retained after invalidation.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Whether the handle itself has been invalidated. A `true` result
    /// says nothing about the entity still being active.
    #[must_use]
    pub fn is_valid_handle(&self) -> bool {
        self.alive.get()
    }

    /// Permanently sever this reference (and every clone of it) from
    /// manager access. Subsequent calls behave as "does not exist".
    pub fn invalidate(&self) {
        self.alive.set(false);
    }

    /// Whether the entity currently exists in some pool.
    #[must_use]
    pub fn exists(&self, manager: &EntityManager) -> bool {
        self.alive.get() && manager.is_active(self.id)
    }

    /// Alias of [`Self::exists`].
    #[must_use]
    pub fn is_active(&self, manager: &EntityManager) -> bool {
        self.exists(manager)
    }

    /// Read a component. `None` if absent or the entity does not exist.
    #[must_use]
    pub fn component<'a, T: Component>(&self, manager: &'a EntityManager) -> Option<&'a T> {
        if !self.exists(manager) {
            return None;
        }
        manager.component::<T>(self.id)
    }

    /// Whether the entity has a component of the given type.
    #[must_use]
    pub fn has_component<T: Component>(&self, manager: &EntityManager) -> bool {
        self.component::<T>(manager).is_some()
    }

    /// Read a component by runtime type id.
    #[must_use]
    pub fn component_dyn<'a>(
        &self,
        manager: &'a EntityManager,
        ty: std::any::TypeId,
    ) -> Option<&'a dyn Component> {
        if !self.exists(manager) {
            return None;
        }
        manager.component_dyn(self.id, ty)
    }

    /// Iterate all components of the entity. Empty if it does not exist.
    pub fn iter_components<'a>(
        &self,
        manager: &'a EntityManager,
    ) -> impl Iterator<Item = &'a dyn Component> {
        let id = if self.exists(manager) {
            self.id
        } else {
            EntityId::NULL
        };
        manager.iter_components(id)
    }

    /// Add (or replace) a component. No-op returning `false` if the entity
    /// does not exist; a replace is logged by the manager and fires a
    /// change notification instead of an add.
    pub fn add_component<T: Component>(&self, manager: &mut EntityManager, component: T) -> bool {
        if !self.exists(manager) {
            return false;
        }
        manager.add_component(self.id, component);
        true
    }

    /// Save a mutated component back, firing a change notification.
    pub fn save_component<T: Component>(&self, manager: &mut EntityManager, component: T) -> bool {
        if !self.exists(manager) {
            return false;
        }
        manager.save_component(self.id, component);
        true
    }

    /// Remove a component, returning it. No-op when inactive.
    pub fn remove_component<T: Component>(&self, manager: &mut EntityManager) -> Option<T> {
        if !self.exists(manager) {
            return None;
        }
        manager
            .remove_component_typed::<T>(self.id)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Destroy the entity. No-op if already inactive; destruction
    /// subscribers observe the full final component set.
    pub fn destroy(&self, manager: &mut EntityManager) {
        if self.exists(manager) {
            manager.destroy(self.id);
        }
    }

    /// Clone into a brand-new entity with copies of all current
    /// components; owned entity references are deep-copied, not shared.
    #[must_use]
    pub fn copy(&self, manager: &mut EntityManager) -> EntityRef {
        if !self.exists(manager) {
            return EntityRef::null();
        }
        manager.copy_entity(self.id)
    }

    /// The entity's scope, default [`Scope::Chunk`].
    #[must_use]
    pub fn scope(&self, manager: &EntityManager) -> Scope {
        manager.scope_of(self.id)
    }

    /// Change the entity's scope, relocating it to the matching pool.
    pub fn set_scope(&self, manager: &mut EntityManager, scope: Scope) -> bool {
        self.exists(manager) && manager.set_scope(self.id, scope)
    }

    /// The owning entity, or the null reference.
    #[must_use]
    pub fn owner(&self, manager: &EntityManager) -> EntityRef {
        manager.entity(manager.owner_of(self.id))
    }

    /// Set the owning entity.
    pub fn set_owner(&self, manager: &mut EntityManager, owner: EntityId) -> bool {
        self.exists(manager) && manager.set_owner(self.id, owner)
    }

    /// Whether the entity is written to world saves.
    #[must_use]
    pub fn is_persistent(&self, manager: &EntityManager) -> bool {
        self.exists(manager) && manager.is_persistent(self.id)
    }

    /// Whether the entity is replicated regardless of distance.
    #[must_use]
    pub fn is_always_relevant(&self, manager: &EntityManager) -> bool {
        self.exists(manager) && manager.is_always_relevant(self.id)
    }

    /// Flip the always-relevant flag.
    pub fn set_always_relevant(&self, manager: &mut EntityManager, relevant: bool) -> bool {
        self.exists(manager) && manager.set_always_relevant(self.id, relevant)
    }

    /// Name of the prefab this entity was instantiated from.
    #[must_use]
    pub fn parent_prefab(&self, manager: &EntityManager) -> Option<String> {
        manager.parent_prefab_of(self.id)
    }
}

impl Clone for EntityRef {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            alive: Rc::clone(&self.alive),
        }
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityRef {}

impl std::hash::Hash for EntityRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alive.get() {
            write!(f, "EntityRef({})", self.id)
        } else {
            write!(f, "EntityRef({}, invalidated)", self.id)
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
