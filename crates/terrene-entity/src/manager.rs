//! The entity manager.
//!
//! Owns the global pool, the sector pool and the per-world pools, plus the
//! id→pool index that is the single source of truth for routing. Every
//! id-addressed operation resolves its pool here; every logical mutation
//! fans out to the registered subscribers synchronously before returning.
//!
//! All mutation is expected to happen on one simulation thread; there is
//! no internal locking. Background work must marshal back onto that thread
//! before calling in.

use std::any::TypeId;
use std::fmt;
use std::mem;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{error, warn};

use crate::component::{Component, ComponentRegistry, FieldValue};
use crate::entity_info::{EntityInfo, Location, Scope, SectorConfig, SectorSimulation};
use crate::id::EntityId;
use crate::lifecycle::{ChangeSubscriber, DestroySubscriber, Events};
use crate::pool::{EntityPool, PoolId};
use crate::prefab::{Prefab, PrefabRegistry};
use crate::reference::EntityRef;

/// Top-level orchestrator of entity storage.
pub struct EntityManager {
    next_id: u64,
    active_ids: FxHashSet<EntityId>,
    global: EntityPool,
    sector: EntityPool,
    worlds: Vec<EntityPool>,
    current_world: Option<u32>,
    pool_index: FxHashMap<EntityId, PoolId>,
    pool_counts: FxHashMap<PoolId, u64>,
    registry: Rc<ComponentRegistry>,
    prefabs: PrefabRegistry,
    change_subscribers: Vec<Box<dyn ChangeSubscriber>>,
    destroy_subscribers: Vec<Box<dyn DestroySubscriber>>,
    sector_config: SectorConfig,
}

impl EntityManager {
    /// Create a manager with a default component registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Rc::new(ComponentRegistry::new()))
    }

    /// Create a manager sharing an externally built registry.
    #[must_use]
    pub fn with_registry(registry: Rc<ComponentRegistry>) -> Self {
        Self {
            next_id: 1,
            active_ids: FxHashSet::default(),
            global: EntityPool::new("global"),
            sector: EntityPool::new("sector"),
            worlds: Vec::new(),
            current_world: None,
            pool_index: FxHashMap::default(),
            pool_counts: FxHashMap::default(),
            registry,
            prefabs: PrefabRegistry::new(),
            change_subscribers: Vec::new(),
            destroy_subscribers: Vec::new(),
            sector_config: SectorConfig::default(),
        }
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// A shared handle to the component registry, for codecs.
    #[must_use]
    pub fn registry_handle(&self) -> Rc<ComponentRegistry> {
        Rc::clone(&self.registry)
    }

    /// The prefab registry.
    #[must_use]
    pub fn prefabs(&self) -> &PrefabRegistry {
        &self.prefabs
    }

    /// Mutable access to the prefab registry.
    pub fn prefabs_mut(&mut self) -> &mut PrefabRegistry {
        &mut self.prefabs
    }

    /// Delta bounds applied when an entity enters sector scope.
    #[must_use]
    pub const fn sector_config(&self) -> SectorConfig {
        self.sector_config
    }

    pub fn set_sector_config(&mut self, config: SectorConfig) {
        self.sector_config = config;
    }

    // ==================== Id allocation ====================

    /// Allocate a fresh id and mark it active. Ids are monotonic, skip the
    /// reserved null id and are never reused.
    pub fn allocate_id(&mut self) -> EntityId {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = EntityId::from_raw(self.next_id);
        self.next_id += 1;
        self.active_ids.insert(id);
        id
    }

    /// Re-register a previously allocated id (persistence load,
    /// reactivation). Fails for ids the counter has not passed yet.
    pub fn register_id(&mut self, id: EntityId) -> bool {
        if id.is_null() || id.as_raw() >= self.next_id {
            error!("prevented attempt to register entity with invalid id {id}");
            return false;
        }
        self.active_ids.insert(id);
        true
    }

    /// The next id the counter will hand out.
    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Restore the id counter (snapshot load).
    pub fn set_next_id(&mut self, next_id: u64) {
        self.next_id = next_id.max(1);
    }

    /// Whether the id is currently active in some pool.
    #[must_use]
    pub fn is_active(&self, id: EntityId) -> bool {
        self.active_ids.contains(&id)
    }

    /// Whether the id has ever been handed out.
    #[must_use]
    pub fn is_allocated(&self, id: EntityId) -> bool {
        !id.is_null() && id.as_raw() < self.next_id
    }

    // ==================== Pools & routing ====================

    /// Create a pool for a loaded world.
    pub fn create_world_pool(&mut self, name: impl Into<String>) -> PoolId {
        let index = self.worlds.len() as u32;
        self.worlds.push(EntityPool::new(name));
        PoolId::World(index)
    }

    /// Select the current world pool. `None` falls back to the global pool
    /// for unscoped operations.
    pub fn set_current_world(&mut self, pool: Option<PoolId>) -> bool {
        match pool {
            None => {
                self.current_world = None;
                true
            }
            Some(PoolId::World(index)) if (index as usize) < self.worlds.len() => {
                self.current_world = Some(index);
                true
            }
            Some(other) => {
                error!("cannot select {other} as the current world pool");
                false
            }
        }
    }

    /// The currently selected world pool, if any.
    #[must_use]
    pub fn current_world(&self) -> Option<PoolId> {
        self.current_world.map(PoolId::World)
    }

    /// The pool unscoped operations target: the current world pool if one
    /// has been established, else the global pool.
    #[must_use]
    pub fn current_pool(&self) -> PoolId {
        self.current_world().unwrap_or(PoolId::Global)
    }

    /// Borrow a pool. The id must come from this manager.
    #[must_use]
    pub fn pool(&self, id: PoolId) -> &EntityPool {
        match id {
            PoolId::Global => &self.global,
            PoolId::Sector => &self.sector,
            PoolId::World(index) => &self.worlds[index as usize],
        }
    }

    fn pool_mut(&mut self, id: PoolId) -> &mut EntityPool {
        match id {
            PoolId::Global => &mut self.global,
            PoolId::Sector => &mut self.sector,
            PoolId::World(index) => &mut self.worlds[index as usize],
        }
    }

    /// The pools unscoped queries aggregate over: global, current world
    /// (when distinct) and sector.
    fn pools_to_scan(&self) -> Vec<PoolId> {
        let mut pools = vec![PoolId::Global];
        if let Some(world) = self.current_world() {
            pools.push(world);
        }
        pools.push(PoolId::Sector);
        pools
    }

    /// Resolve the pool owning an id. An id that looks allocated but has
    /// no assignment is a logged error, not a panic.
    #[must_use]
    pub fn pool_of(&self, id: EntityId) -> Option<PoolId> {
        let pool = self.pool_index.get(&id).copied();
        if pool.is_none() && self.is_allocated(id) {
            error!("entity {id} has no pool assignment");
        }
        pool
    }

    /// Point the id→pool index at the given pool. Does not move any
    /// components; use [`Self::move_to_pool`] for that.
    pub fn assign_to_pool(&mut self, id: EntityId, pool: PoolId) {
        let previous = self.pool_index.insert(id, pool);
        if previous == Some(pool) {
            return;
        }
        if let Some(old) = previous {
            self.decrement_count(old);
        }
        *self.pool_counts.entry(pool).or_insert(0) += 1;
    }

    /// Drop the id's pool assignment.
    pub fn unassign_pool(&mut self, id: EntityId) {
        if let Some(old) = self.pool_index.remove(&id) {
            self.decrement_count(old);
        }
    }

    fn decrement_count(&mut self, pool: PoolId) {
        if let Some(count) = self.pool_counts.get_mut(&pool) {
            *count = count.saturating_sub(1);
        }
    }

    /// Entities currently assigned to a pool, per the index.
    #[must_use]
    pub fn pool_count(&self, pool: PoolId) -> u64 {
        self.pool_counts.get(&pool).copied().unwrap_or(0)
    }

    /// Detach an id and its components from its pool without destroying
    /// anything or firing events. Used to relocate entities.
    pub fn detach(&mut self, id: EntityId) -> Option<(EntityRef, Vec<Box<dyn Component>>)> {
        let pool_id = self.pool_of(id)?;
        let detached = self.pool_mut(pool_id).detach(id)?;
        self.unassign_pool(id);
        Some(detached)
    }

    /// The dual of [`Self::detach`]: re-attach a previously detached
    /// reference and components into a pool. Fires no events; the caller
    /// decides whether this is a fresh or relocated entity.
    pub fn insert_ref(
        &mut self,
        pool: PoolId,
        entity: EntityRef,
        components: Vec<Box<dyn Component>>,
    ) {
        let id = entity.id();
        self.pool_mut(pool).attach(entity, components);
        self.assign_to_pool(id, pool);
    }

    /// Move an entity to another pool, preserving id and reference
    /// identity. A no-op returning `true` if it is already there; `false`
    /// if the entity has no pool. Not atomic across failure: if detaching
    /// fails the target pool is left untouched.
    pub fn move_to_pool(&mut self, id: EntityId, target: PoolId) -> bool {
        if self.pool_index.get(&id) == Some(&target) {
            return true;
        }
        let Some((entity, components)) = self.detach(id) else {
            return false;
        };
        self.insert_ref(target, entity, components);
        true
    }

    // ==================== Creation ====================

    /// Create an entity with the given components in a specific pool. An
    /// [`EntityInfo`] is supplied if the components lack one.
    pub fn create_in(
        &mut self,
        pool: PoolId,
        mut components: Vec<Box<dyn Component>>,
        events: Events,
    ) -> EntityRef {
        if !components.iter().any(|c| c.is::<EntityInfo>()) {
            components.push(Box::new(EntityInfo::default()));
        }
        let id = self.allocate_id();
        let entity = EntityRef::new(id);
        let types: Vec<TypeId> = components.iter().map(|c| c.as_any().type_id()).collect();
        self.pool_mut(pool).attach(entity.clone(), components);
        self.assign_to_pool(id, pool);
        if events.fire() {
            for ty in types {
                self.notify_added(id, ty);
            }
        }
        entity
    }

    /// Create an entity in the current pool.
    pub fn create(&mut self, components: Vec<Box<dyn Component>>) -> EntityRef {
        self.create_in(self.current_pool(), components, Events::Fire)
    }

    /// Create an empty entity (just its [`EntityInfo`]).
    pub fn create_empty(&mut self) -> EntityRef {
        self.create(Vec::new())
    }

    /// Create an entity in the current pool without notifying
    /// subscribers. Bulk persistence load paths use this.
    pub fn create_without_events(&mut self, components: Vec<Box<dyn Component>>) -> EntityRef {
        self.create_in(self.current_pool(), components, Events::Suppress)
    }

    /// Instantiate a prefab by name in the current pool.
    pub fn create_from_prefab(&mut self, name: &str) -> EntityRef {
        let Some(prefab) = self.prefabs.get(name) else {
            warn!("unable to instantiate unknown prefab: {name:?}");
            return EntityRef::null();
        };
        self.create_from(&prefab, None, None, Events::Fire)
    }

    /// Instantiate a prefab at a position, optionally rotated.
    pub fn create_from_prefab_at(
        &mut self,
        name: &str,
        position: [f32; 3],
        rotation: Option<[f32; 4]>,
    ) -> EntityRef {
        let Some(prefab) = self.prefabs.get(name) else {
            warn!("unable to instantiate unknown prefab: {name:?}");
            return EntityRef::null();
        };
        self.create_from(&prefab, Some(position), rotation, Events::Fire)
    }

    /// Instantiate a prefab: the effective component set (resolved through
    /// the parent chain) is cloned, the location is overridden when given,
    /// and the prefab's persistence flags are copied onto the instance.
    pub fn create_from(
        &mut self,
        prefab: &Rc<Prefab>,
        position: Option<[f32; 3]>,
        rotation: Option<[f32; 4]>,
        events: Events,
    ) -> EntityRef {
        let mut components: Vec<Box<dyn Component>> =
            prefab.components().iter().map(|c| c.clone_boxed()).collect();
        if let Some(position) = position {
            match components.iter_mut().find_map(|c| c.downcast_mut::<Location>()) {
                Some(location) => {
                    location.position = position;
                    if let Some(rotation) = rotation {
                        location.rotation = rotation;
                    }
                }
                None => {
                    let mut location = Location::at(position);
                    if let Some(rotation) = rotation {
                        location.rotation = rotation;
                    }
                    components.push(Box::new(location));
                }
            }
        }
        components.push(Box::new(EntityInfo::from_prefab(
            prefab.name(),
            prefab.persisted(),
            prefab.always_relevant(),
        )));
        self.create_in(self.current_pool(), components, events)
    }

    /// Create a sector-scope entity with the given delta bounds.
    pub fn create_sector_entity(
        &mut self,
        unloaded_max_delta: u64,
        loaded_max_delta: u64,
    ) -> EntityRef {
        let info = EntityInfo {
            scope: Scope::Sector,
            ..EntityInfo::default()
        };
        let sim = SectorSimulation {
            unloaded_max_delta,
            loaded_max_delta,
        };
        self.create_in(
            PoolId::Sector,
            vec![Box::new(info), Box::new(sim)],
            Events::Fire,
        )
    }

    /// Reconstitute an entity under a previously allocated id, e.g. when
    /// loading stored state. Returns the null reference (and changes
    /// nothing) if the id was never allocated. Fires a reactivation
    /// notification unless suppressed.
    pub fn create_with_id(
        &mut self,
        id: EntityId,
        mut components: Vec<Box<dyn Component>>,
        events: Events,
    ) -> EntityRef {
        if self.is_active(id) {
            error!("entity {id} is already active, refusing to recreate it");
            return self.entity(id);
        }
        if !self.register_id(id) {
            return EntityRef::null();
        }
        if !components.iter().any(|c| c.is::<EntityInfo>()) {
            components.push(Box::new(EntityInfo::default()));
        }
        let types: Vec<TypeId> = components.iter().map(|c| c.as_any().type_id()).collect();
        // A deactivated-for-storage entity keeps its pool assignment and
        // canonical ref; reuse them when present.
        let pool = self.pool_index.get(&id).copied().unwrap_or_else(|| self.current_pool());
        let entity = self
            .pool(pool)
            .entity(id)
            .filter(EntityRef::is_valid_handle)
            .unwrap_or_else(|| EntityRef::new(id));
        self.pool_mut(pool).attach(entity.clone(), components);
        self.assign_to_pool(id, pool);
        if events.fire() {
            self.notify_reactivated(id);
            for ty in types {
                self.notify_added(id, ty);
            }
        }
        entity
    }

    // ==================== Destruction & deactivation ====================

    /// Destroy an entity: destruction subscribers run first with the full
    /// component set still readable, then components are cleared, the ref
    /// invalidated and the id unrouted. The id is never reused. A second
    /// call is a no-op.
    pub fn destroy(&mut self, id: EntityId) {
        self.destroy_with(id, Events::Fire);
    }

    /// Destroy without notifying subscribers.
    pub fn destroy_without_events(&mut self, id: EntityId) {
        self.destroy_with(id, Events::Suppress);
    }

    /// [`Self::destroy`] with suppressible notifications.
    pub fn destroy_with(&mut self, id: EntityId, events: Events) {
        if !self.is_active(id) {
            return;
        }
        let Some(pool_id) = self.pool_of(id) else {
            return;
        };
        if events.fire() {
            let types = self.pool(pool_id).store().types_of(id);
            for ty in types {
                self.notify_removed(id, ty);
            }
            self.notify_destroyed(id);
        }
        self.pool_mut(pool_id).evict(id);
        self.unassign_pool(id);
        self.active_ids.remove(&id);
    }

    /// Deactivate an entity for storage: before-deactivation subscribers
    /// see the full component set, then components leave the live store.
    /// The id keeps its pool assignment and canonical ref so the entity
    /// can later be reconstituted via [`Self::create_with_id`].
    pub fn deactivate_for_storage(&mut self, id: EntityId) {
        if !self.is_active(id) {
            return;
        }
        let Some(pool_id) = self.pool_of(id) else {
            return;
        };
        self.notify_before_deactivation(id);
        self.pool_mut(pool_id).store_mut().remove_entity(id);
        self.active_ids.remove(&id);
    }

    /// Drop every entity, prefab assignment aside, and reset the id
    /// counter. Pools survive but are emptied; references are invalidated.
    pub fn clear(&mut self) {
        self.global.clear();
        self.sector.clear();
        for world in &mut self.worlds {
            world.clear();
        }
        self.pool_index.clear();
        self.pool_counts.clear();
        self.active_ids.clear();
        self.next_id = 1;
    }

    // ==================== Component operations ====================

    /// Read a component by entity id.
    #[must_use]
    pub fn component<T: Component>(&self, id: EntityId) -> Option<&T> {
        let pool = self.pool_of(id)?;
        self.pool(pool).store().get_typed::<T>(id)
    }

    /// Read a component dynamically.
    #[must_use]
    pub fn component_dyn(&self, id: EntityId, ty: TypeId) -> Option<&dyn Component> {
        let pool = self.pool_of(id)?;
        self.pool(pool).store().get(id, ty)
    }

    /// Whether the entity carries the component type.
    #[must_use]
    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.component::<T>(id).is_some()
    }

    /// Iterate all components of an entity. Empty for unrouted ids.
    pub fn iter_components(&self, id: EntityId) -> impl Iterator<Item = &dyn Component> {
        self.pool_of(id)
            .into_iter()
            .flat_map(move |pool| self.pool(pool).store().iter_entity(id))
    }

    /// Add (or replace) a component. A replace is anomalous: it is logged
    /// and fires a change notification instead of an add.
    pub fn add_component<T: Component>(&mut self, id: EntityId, component: T) {
        self.add_component_boxed(id, Box::new(component));
    }

    /// Dynamically-typed [`Self::add_component`].
    pub fn add_component_boxed(&mut self, id: EntityId, component: Box<dyn Component>) {
        let ty = component.as_any().type_id();
        let Some(pool_id) = self.pool_of(id) else {
            return;
        };
        let component = self.guard_entity_info(id, pool_id, component);
        let previous = self.pool_mut(pool_id).store_mut().put(id, component);
        if previous.is_none() {
            self.notify_added(id, ty);
        } else {
            error!(
                "adding component {} over an existing component on entity {id}",
                self.type_label(ty)
            );
            self.notify_changed(id, ty);
        }
    }

    /// Save a mutated component back, firing a change notification. Saving
    /// a component the entity did not have is logged and treated as an add.
    pub fn save_component<T: Component>(&mut self, id: EntityId, component: T) {
        self.save_component_boxed(id, Box::new(component));
    }

    /// Dynamically-typed [`Self::save_component`].
    pub fn save_component_boxed(&mut self, id: EntityId, component: Box<dyn Component>) {
        let ty = component.as_any().type_id();
        let Some(pool_id) = self.pool_of(id) else {
            return;
        };
        let component = self.guard_entity_info(id, pool_id, component);
        let previous = self.pool_mut(pool_id).store_mut().put(id, component);
        if previous.is_none() {
            error!(
                "saving component {} that does not belong to entity {id}",
                self.type_label(ty)
            );
            self.notify_added(id, ty);
        } else {
            self.notify_changed(id, ty);
        }
    }

    /// Remove a component, notifying subscribers while it is still
    /// readable. Returns the removed instance.
    pub fn remove_component(&mut self, id: EntityId, ty: TypeId) -> Option<Box<dyn Component>> {
        let pool_id = self.pool_of(id)?;
        if !self.pool(pool_id).store().contains(id, ty) {
            return None;
        }
        self.notify_removed(id, ty);
        self.pool_mut(pool_id).store_mut().remove(id, ty)
    }

    /// Typed [`Self::remove_component`].
    pub fn remove_component_typed<T: Component>(&mut self, id: EntityId) -> Option<Box<dyn Component>> {
        self.remove_component(id, TypeId::of::<T>())
    }

    /// The `persisted` flag of [`EntityInfo`] is fixed at creation; restore
    /// it if a write tries to flip it.
    fn guard_entity_info(
        &self,
        id: EntityId,
        pool_id: PoolId,
        mut component: Box<dyn Component>,
    ) -> Box<dyn Component> {
        if let Some(incoming) = component.downcast_mut::<EntityInfo>() {
            if let Some(existing) = self.pool(pool_id).store().get_typed::<EntityInfo>(id) {
                if existing.persisted != incoming.persisted {
                    error!("entity {id} persisted flag is fixed at creation, keeping {}", existing.persisted);
                    incoming.persisted = existing.persisted;
                }
            }
        }
        component
    }

    fn type_label(&self, ty: TypeId) -> &'static str {
        self.registry.get(ty).map_or("<unregistered>", |info| info.name())
    }

    // ==================== Entity copy ====================

    /// Clone an entity into a brand-new one in the current pool. Owned
    /// entity references are deep-copied recursively (ownership must be
    /// acyclic) and the referencing fields rewritten to the copies.
    pub fn copy_entity(&mut self, id: EntityId) -> EntityRef {
        if !self.is_active(id) {
            return EntityRef::null();
        }
        let components = self.copy_components(id);
        self.create_in(self.current_pool(), components, Events::Fire)
    }

    /// Deep-copy an entity's components, cascading through owned entity
    /// references.
    pub fn copy_components(&mut self, id: EntityId) -> Vec<Box<dyn Component>> {
        let Some(pool_id) = self.pool_of(id) else {
            return Vec::new();
        };
        let mut clones: Vec<Box<dyn Component>> = self
            .pool(pool_id)
            .store()
            .iter_entity(id)
            .map(|c| c.clone_boxed())
            .collect();
        for component in &mut clones {
            for owned in component.owned_references() {
                if owned.is_null() || !self.is_active(owned) {
                    continue;
                }
                let copy = self.copy_entity(owned);
                for index in 0..component.field_names().len() {
                    if component.field(index) == Some(FieldValue::Entity(owned)) {
                        component.set_field(index, &FieldValue::Entity(copy.id()));
                    }
                }
            }
        }
        clones
    }

    // ==================== Entity info accessors ====================

    /// The canonical reference for an id, or the null reference.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> EntityRef {
        self.pool_of(id)
            .and_then(|pool| self.pool(pool).entity(id))
            .unwrap_or_else(EntityRef::null)
    }

    /// The entity's scope, default [`Scope::Chunk`].
    #[must_use]
    pub fn scope_of(&self, id: EntityId) -> Scope {
        self.component::<EntityInfo>(id).map_or(Scope::Chunk, |info| info.scope)
    }

    /// The entity's owner id, or null.
    #[must_use]
    pub fn owner_of(&self, id: EntityId) -> EntityId {
        self.component::<EntityInfo>(id).map_or(EntityId::NULL, |info| info.owner)
    }

    /// Whether the entity is written to world saves.
    #[must_use]
    pub fn is_persistent(&self, id: EntityId) -> bool {
        self.component::<EntityInfo>(id).is_some_and(|info| info.persisted)
    }

    /// Whether the entity is replicated regardless of distance.
    #[must_use]
    pub fn is_always_relevant(&self, id: EntityId) -> bool {
        self.component::<EntityInfo>(id).is_some_and(|info| info.always_relevant)
    }

    /// Name of the prefab the entity was instantiated from.
    #[must_use]
    pub fn parent_prefab_of(&self, id: EntityId) -> Option<String> {
        self.component::<EntityInfo>(id)?.parent_prefab.clone()
    }

    /// Set the owning entity.
    pub fn set_owner(&mut self, id: EntityId, owner: EntityId) -> bool {
        let Some(mut info) = self.component::<EntityInfo>(id).cloned() else {
            return false;
        };
        if info.owner != owner {
            info.owner = owner;
            self.save_component(id, info);
        }
        true
    }

    /// Flip the always-relevant flag.
    pub fn set_always_relevant(&mut self, id: EntityId, relevant: bool) -> bool {
        let Some(mut info) = self.component::<EntityInfo>(id).cloned() else {
            return false;
        };
        if info.always_relevant != relevant {
            info.always_relevant = relevant;
            self.save_component(id, info);
        }
        true
    }

    /// Change an entity's scope. Routes the entity to the matching pool
    /// (global scope → global pool, chunk scope → current world pool,
    /// sector scope → sector pool) and keeps the [`SectorSimulation`]
    /// component consistent: present with the configured bounds iff the
    /// scope is sector.
    pub fn set_scope(&mut self, id: EntityId, scope: Scope) -> bool {
        let Some(info) = self.component::<EntityInfo>(id) else {
            return false;
        };
        let info = info.clone();
        let target = match scope {
            Scope::Global => PoolId::Global,
            Scope::Sector => PoolId::Sector,
            Scope::Chunk => self.current_pool(),
        };
        if !self.move_to_pool(id, target) {
            return false;
        }
        if info.scope != scope {
            let mut updated = info;
            updated.scope = scope;
            self.save_component(id, updated);
        }
        if scope == Scope::Sector {
            if !self.has_component::<SectorSimulation>(id) {
                self.add_component(id, self.sector_config.simulation());
            }
        } else if self.has_component::<SectorSimulation>(id) {
            self.remove_component_typed::<SectorSimulation>(id);
        }
        true
    }

    // ==================== Enumeration ====================

    /// Every active entity across the global, current world and sector
    /// pools.
    #[must_use]
    pub fn all_entities(&self) -> Vec<EntityRef> {
        let mut out = Vec::new();
        for pool in self.pools_to_scan() {
            out.extend(
                self.pool(pool)
                    .all_entities()
                    .into_iter()
                    .filter(|e| self.is_active(e.id())),
            );
        }
        out
    }

    /// Entities carrying all of the given component types.
    #[must_use]
    pub fn entities_with(&self, types: &[TypeId]) -> Vec<EntityRef> {
        let mut out = Vec::new();
        for pool in self.pools_to_scan() {
            out.extend(self.pool(pool).entities_with(types));
        }
        out
    }

    /// Entities carrying component type `T`.
    #[must_use]
    pub fn entities_with_component<T: Component>(&self) -> Vec<EntityRef> {
        self.entities_with(&[TypeId::of::<T>()])
    }

    /// Count of entities carrying all of the given component types.
    #[must_use]
    pub fn count_with(&self, types: &[TypeId]) -> usize {
        self.pools_to_scan()
            .into_iter()
            .map(|pool| self.pool(pool).count_with(types))
            .sum()
    }

    /// Number of active entities in the scanned pools.
    #[must_use]
    pub fn active_entity_count(&self) -> usize {
        self.pools_to_scan()
            .into_iter()
            .map(|pool| self.pool(pool).active_count())
            .sum()
    }

    /// Every `(entity, component)` pair of one type across the scanned
    /// pools.
    #[must_use]
    pub fn list_components<T: Component>(&self) -> Vec<(EntityRef, &T)> {
        let mut out = Vec::new();
        for pool_id in self.pools_to_scan() {
            let pool = self.pool(pool_id);
            for (id, component) in pool.store().iter_type(TypeId::of::<T>()) {
                if let (Some(entity), Some(component)) =
                    (pool.entity(id), component.downcast_ref::<T>())
                {
                    out.push((entity, component));
                }
            }
        }
        out
    }

    // ==================== Subscribers ====================

    /// Register a change subscriber. Fan-out order is registration order.
    pub fn subscribe_changes(&mut self, subscriber: Box<dyn ChangeSubscriber>) {
        self.change_subscribers.push(subscriber);
    }

    /// Register a destruction subscriber.
    pub fn subscribe_destruction(&mut self, subscriber: Box<dyn DestroySubscriber>) {
        self.destroy_subscribers.push(subscriber);
    }

    fn notify_added(&mut self, id: EntityId, ty: TypeId) {
        if self.change_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.change_subscribers);
        for subscriber in &mut subscribers {
            subscriber.component_added(self, &entity, ty);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_changed(&mut self, id: EntityId, ty: TypeId) {
        if self.change_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.change_subscribers);
        for subscriber in &mut subscribers {
            subscriber.component_changed(self, &entity, ty);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_removed(&mut self, id: EntityId, ty: TypeId) {
        if self.change_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.change_subscribers);
        for subscriber in &mut subscribers {
            subscriber.component_removed(self, &entity, ty);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_before_deactivation(&mut self, id: EntityId) {
        if self.change_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.change_subscribers);
        for subscriber in &mut subscribers {
            subscriber.before_deactivation(self, &entity);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_reactivated(&mut self, id: EntityId) {
        if self.change_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.change_subscribers);
        for subscriber in &mut subscribers {
            subscriber.reactivated(self, &entity);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_destroyed(&mut self, id: EntityId) {
        if self.destroy_subscribers.is_empty() {
            return;
        }
        let entity = self.entity(id);
        let mut subscribers = mem::take(&mut self.destroy_subscribers);
        for subscriber in &mut subscribers {
            subscriber.entity_destroyed(self, &entity);
        }
        self.destroy_subscribers = subscribers;
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("next_id", &self.next_id)
            .field("active", &self.active_ids.len())
            .field("worlds", &self.worlds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::prefab::PrefabData;
    use terrene_entity_derive::Component;

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Health {
        value: i32,
    }

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct Inventory {
        #[component(owned)]
        container: EntityId,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum Change {
        Added,
        Changed,
        Removed,
        BeforeDeactivation,
        Reactivated,
    }

    #[derive(Default)]
    struct Recorder {
        log: Rc<RefCell<Vec<(Change, EntityId)>>>,
    }

    impl ChangeSubscriber for Recorder {
        fn component_added(&mut self, _: &EntityManager, entity: &EntityRef, _: TypeId) {
            self.log.borrow_mut().push((Change::Added, entity.id()));
        }

        fn component_changed(&mut self, _: &EntityManager, entity: &EntityRef, _: TypeId) {
            self.log.borrow_mut().push((Change::Changed, entity.id()));
        }

        fn component_removed(&mut self, _: &EntityManager, entity: &EntityRef, _: TypeId) {
            self.log.borrow_mut().push((Change::Removed, entity.id()));
        }

        fn before_deactivation(&mut self, _: &EntityManager, entity: &EntityRef) {
            self.log
                .borrow_mut()
                .push((Change::BeforeDeactivation, entity.id()));
        }

        fn reactivated(&mut self, _: &EntityManager, entity: &EntityRef) {
            self.log.borrow_mut().push((Change::Reactivated, entity.id()));
        }
    }

    fn manager() -> EntityManager {
        let mut registry = ComponentRegistry::new();
        registry.register::<Health>();
        registry.register::<Inventory>();
        EntityManager::with_registry(Rc::new(registry))
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut em = manager();
        let a = em.create_empty();
        let b = em.create_empty();
        assert!(b.id() > a.id());

        let destroyed = b.id();
        em.destroy(destroyed);
        let c = em.create_empty();
        assert!(c.id() > destroyed);
        assert!(!em.is_active(destroyed));
        assert!(em.is_allocated(destroyed));
    }

    #[test]
    fn create_inserts_entity_info() {
        let mut em = manager();
        let entity = em.create(vec![Box::new(Health { value: 7 })]);
        assert!(entity.has_component::<EntityInfo>(&em));
        assert_eq!(
            entity.component::<Health>(&em),
            Some(&Health { value: 7 })
        );
        assert_eq!(em.scope_of(entity.id()), Scope::Chunk);
    }

    #[test]
    fn add_over_existing_fires_changed() {
        let mut em = manager();
        let log = Rc::new(RefCell::new(Vec::new()));
        em.subscribe_changes(Box::new(Recorder { log: Rc::clone(&log) }));

        let entity = em.create(vec![Box::new(Health { value: 1 })]);
        log.borrow_mut().clear();

        em.add_component(entity.id(), Health { value: 2 });
        assert_eq!(log.borrow().as_slice(), &[(Change::Changed, entity.id())]);
        assert_eq!(
            em.component::<Health>(entity.id()),
            Some(&Health { value: 2 })
        );
    }

    #[test]
    fn save_without_existing_is_best_effort_add() {
        let mut em = manager();
        let log = Rc::new(RefCell::new(Vec::new()));
        em.subscribe_changes(Box::new(Recorder { log: Rc::clone(&log) }));

        let entity = em.create_empty();
        log.borrow_mut().clear();
        em.save_component(entity.id(), Health { value: 3 });
        assert_eq!(log.borrow().as_slice(), &[(Change::Added, entity.id())]);
        assert!(em.has_component::<Health>(entity.id()));
    }

    #[test]
    fn destroy_notifies_once_with_components_readable() {
        let mut em = manager();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_by_subscriber = Rc::clone(&seen);
        em.subscribe_destruction(Box::new(
            move |manager: &EntityManager, entity: &EntityRef| {
                let health = entity.component::<Health>(manager).cloned();
                seen_by_subscriber.borrow_mut().push(health);
            },
        ));

        let entity = em.create(vec![Box::new(Health { value: 42 })]);
        let id = entity.id();
        em.destroy(id);
        em.destroy(id);

        assert_eq!(seen.borrow().as_slice(), &[Some(Health { value: 42 })]);
        assert!(!em.is_active(id));
        assert!(!entity.is_valid_handle());
        assert!(em.component::<Health>(id).is_none());
    }

    #[test]
    fn move_to_pool_is_idempotent_and_preserves_identity() {
        let mut em = manager();
        let world = em.create_world_pool("overworld");
        let entity = em.create(vec![Box::new(Health { value: 5 })]);
        let id = entity.id();
        assert_eq!(em.pool_of(id), Some(PoolId::Global));

        assert!(em.move_to_pool(id, world));
        assert!(em.move_to_pool(id, world));
        assert_eq!(em.pool_of(id), Some(world));
        assert_eq!(em.pool_count(PoolId::Global), 0);
        assert_eq!(em.pool_count(world), 1);

        // same reference identity, components intact
        let moved = em.entity(id);
        assert!(moved.is_valid_handle());
        assert_eq!(
            em.component::<Health>(id),
            Some(&Health { value: 5 })
        );
    }

    #[test]
    fn move_of_unrouted_id_fails() {
        let mut em = manager();
        assert!(!em.move_to_pool(EntityId::from_raw(999), PoolId::Sector));
    }

    #[test]
    fn sector_scope_round_trip() {
        let mut em = manager();
        let entity = em.create_empty();
        let id = entity.id();

        assert!(em.set_scope(id, Scope::Sector));
        assert_eq!(em.pool_of(id), Some(PoolId::Sector));
        assert!(em.has_component::<SectorSimulation>(id));
        assert_eq!(em.scope_of(id), Scope::Sector);
        assert!(em.pool(PoolId::Sector).contains(id));
        assert!(!em.pool(PoolId::Global).contains(id));

        assert!(em.set_scope(id, Scope::Chunk));
        assert_eq!(em.pool_of(id), Some(PoolId::Global));
        assert!(!em.has_component::<SectorSimulation>(id));
    }

    #[test]
    fn sector_entities_carry_configured_bounds() {
        let mut em = manager();
        let entity = em.create_sector_entity(20_000, 500);
        let sim = em
            .component::<SectorSimulation>(entity.id())
            .cloned()
            .unwrap();
        assert_eq!(sim.unloaded_max_delta, 20_000);
        assert_eq!(sim.loaded_max_delta, 500);
        assert_eq!(em.scope_of(entity.id()), Scope::Sector);
    }

    #[test]
    fn deactivate_then_reactivate_under_same_id() {
        let mut em = manager();
        let log = Rc::new(RefCell::new(Vec::new()));
        em.subscribe_changes(Box::new(Recorder { log: Rc::clone(&log) }));

        let entity = em.create(vec![Box::new(Health { value: 9 })]);
        let id = entity.id();
        log.borrow_mut().clear();

        em.deactivate_for_storage(id);
        assert_eq!(
            log.borrow().as_slice(),
            &[(Change::BeforeDeactivation, id)]
        );
        assert!(!em.is_active(id));
        assert_eq!(em.pool_of(id), Some(PoolId::Global));
        assert!(em.component::<Health>(id).is_none());

        log.borrow_mut().clear();
        let revived = em.create_with_id(id, vec![Box::new(Health { value: 9 })], Events::Fire);
        assert_eq!(revived.id(), id);
        assert!(em.is_active(id));
        assert_eq!(log.borrow()[0], (Change::Reactivated, id));
        assert_eq!(
            em.component::<Health>(id),
            Some(&Health { value: 9 })
        );
    }

    #[test]
    fn create_with_id_rejects_unallocated_ids() {
        let mut em = manager();
        let bogus = EntityId::from_raw(em.next_id() + 10);
        let entity = em.create_with_id(bogus, Vec::new(), Events::Fire);
        assert!(entity.id().is_null());
        assert!(!em.is_active(bogus));
    }

    #[test]
    fn copy_deep_copies_owned_references() {
        let mut em = manager();
        let bag = em.create(vec![Box::new(Health { value: 1 })]);
        let holder = em.create(vec![Box::new(Inventory {
            container: bag.id(),
        })]);

        let copy = em.copy_entity(holder.id());
        assert!(copy.exists(&em));
        let copied_inv = em.component::<Inventory>(copy.id()).unwrap();
        assert_ne!(copied_inv.container, bag.id());
        assert!(em.is_active(copied_inv.container));
        assert!(em.has_component::<Health>(copied_inv.container));
        // the original still owns the original bag
        assert_eq!(
            em.component::<Inventory>(holder.id()).unwrap().container,
            bag.id()
        );
    }

    #[test]
    fn prefab_instantiation_copies_flags_and_components() {
        let mut em = manager();
        let mut data = PrefabData::new("tree");
        data.set_component(Box::new(Health { value: 100 }));
        data.set_always_relevant(true);
        em.prefabs_mut().publish(data).unwrap();

        let entity = em.create_from_prefab("tree");
        assert!(entity.exists(&em));
        assert_eq!(
            entity.component::<Health>(&em),
            Some(&Health { value: 100 })
        );
        assert_eq!(entity.parent_prefab(&em).as_deref(), Some("tree"));
        assert!(entity.is_always_relevant(&em));

        let missing = em.create_from_prefab("no-such-prefab");
        assert!(!missing.exists(&em));
    }

    #[test]
    fn prefab_instantiation_at_position() {
        let mut em = manager();
        em.prefabs_mut().publish(PrefabData::new("rock")).unwrap();
        let entity = em.create_from_prefab_at("rock", [1.0, 2.0, 3.0], None);
        let location = entity.component::<Location>(&em).unwrap();
        assert_eq!(location.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn persisted_flag_is_fixed_at_creation() {
        let mut em = manager();
        let entity = em.create_empty();
        let id = entity.id();
        assert!(em.is_persistent(id));

        let mut info = em.component::<EntityInfo>(id).cloned().unwrap();
        info.persisted = false;
        info.always_relevant = true;
        em.save_component(id, info);

        // the flip is discarded, the rest of the save applies
        assert!(em.is_persistent(id));
        assert!(em.is_always_relevant(id));
    }

    #[test]
    fn aggregated_queries_span_pools() {
        let mut em = manager();
        em.create(vec![Box::new(Health { value: 1 })]);
        let sector = em.create_sector_entity(1_000, 100);
        em.add_component(sector.id(), Health { value: 2 });

        assert_eq!(em.count_with(&[TypeId::of::<Health>()]), 2);
        assert_eq!(em.entities_with_component::<Health>().len(), 2);
        assert_eq!(em.list_components::<Health>().len(), 2);
        assert_eq!(em.active_entity_count(), 2);
    }

    #[test]
    fn clear_resets_ids_and_pools() {
        let mut em = manager();
        let entity = em.create_empty();
        em.clear();
        assert!(!entity.is_valid_handle());
        assert_eq!(em.next_id(), 1);
        assert_eq!(em.active_entity_count(), 0);
    }
}
