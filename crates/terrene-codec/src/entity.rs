//! Packed entity codec.
//!
//! Encodes a whole entity as three parallel streams (component ids,
//! per-component field counts, flat field ids) plus the flat value list.
//! With a parent prefab recorded, only the components and fields that
//! differ from the resolved prefab are written, together with the
//! component-type ids removed relative to it. Deserialization resolves
//! the prefab's full component set first, overlays the encoded deltas,
//! then applies the explicit removals.

use std::any::TypeId;

use std::rc::Rc;

use tracing::{error, warn};

use terrene_entity::{
    Component, ComponentRegistry, EntityId, EntityInfo, EntityManager, EntityRef, Events, PoolId,
    Scope,
};

use crate::check::{AllComponents, ComponentCheck, FieldCheck};
use crate::component::{ComponentCodec, ComponentIdTable};
use crate::record::EntityRecord;

/// Entity (de)serializer. Requires a component id table; the packed
/// streams have no name fallback.
pub struct EntityCodec {
    components: ComponentCodec,
    component_check: Box<dyn ComponentCheck>,
    ignore_entity_ids: bool,
}

impl EntityCodec {
    /// Build a codec over the given registry and session id table.
    #[must_use]
    pub fn new(registry: Rc<ComponentRegistry>, table: ComponentIdTable) -> Self {
        Self {
            components: ComponentCodec::new(registry)
                .with_id_table(table)
                .with_field_ids(true),
            component_check: Box::new(AllComponents),
            ignore_entity_ids: false,
        }
    }

    /// Exclude whole component types from (de)serialization.
    #[must_use]
    pub fn with_component_check(mut self, check: Box<dyn ComponentCheck>) -> Self {
        self.component_check = check;
        self
    }

    /// Do not record entity ids; deserialized entities get fresh ones.
    #[must_use]
    pub fn with_ignored_entity_ids(mut self, ignore: bool) -> Self {
        self.ignore_entity_ids = ignore;
        self
    }

    /// The underlying component codec.
    #[must_use]
    pub fn component_codec(&self) -> &ComponentCodec {
        &self.components
    }

    fn table(&self) -> &ComponentIdTable {
        self.components
            .id_table()
            .expect("entity codec always carries an id table")
    }

    fn check_type(&self, component: &dyn Component) -> bool {
        self.components
            .registry()
            .get_for(component)
            .is_some_and(|info| self.component_check.should_serialize(info))
    }

    /// Serialize an entity, delta-encoded against its parent prefab when
    /// one is recorded and `delta_against_prefab` is set. Returns `None`
    /// if the entity does not exist.
    #[must_use]
    pub fn serialize(
        &self,
        manager: &EntityManager,
        entity: &EntityRef,
        delta_against_prefab: bool,
        field_check: &dyn FieldCheck,
    ) -> Option<EntityRecord> {
        if !entity.exists(manager) {
            return None;
        }
        let id = entity.id();
        let prefab = manager
            .parent_prefab_of(id)
            .filter(|_| delta_against_prefab)
            .and_then(|name| manager.prefabs().get(&name));
        match prefab {
            Some(prefab) => Some(self.serialize_delta(manager, id, &prefab, field_check)),
            None => Some(self.serialize_full(manager, id, field_check)),
        }
    }

    fn envelope(&self, manager: &EntityManager, id: EntityId) -> EntityRecord {
        let mut record = EntityRecord::default();
        if !self.ignore_entity_ids {
            record.id = Some(id);
        }
        let owner = manager.owner_of(id);
        if !owner.is_null() {
            record.owner = Some(owner);
        }
        let scope = manager.scope_of(id);
        if scope != Scope::Chunk {
            record.scope = Some(scope);
        }
        record
    }

    fn serialize_full(
        &self,
        manager: &EntityManager,
        id: EntityId,
        field_check: &dyn FieldCheck,
    ) -> EntityRecord {
        let mut record = self.envelope(manager, id);
        record.always_relevant = Some(manager.is_always_relevant(id));
        for component in manager.iter_components(id) {
            if !self.check_type(component) {
                continue;
            }
            self.push_full(component, true, true, field_check, &mut record);
        }
        record
    }

    fn serialize_delta(
        &self,
        manager: &EntityManager,
        id: EntityId,
        prefab: &terrene_entity::Prefab,
        field_check: &dyn FieldCheck,
    ) -> EntityRecord {
        let mut record = self.envelope(manager, id);
        record.parent_prefab = Some(prefab.name().to_owned());
        let always_relevant = manager.is_always_relevant(id);
        if always_relevant != prefab.always_relevant() {
            record.always_relevant = Some(always_relevant);
        }

        let mut present = Vec::new();
        for component in manager.iter_components(id) {
            if !self.check_type(component) {
                continue;
            }
            present.push(component.as_any().type_id());
            match prefab.component(component.type_name()) {
                Some(base) => self.push_delta(base, component, field_check, &mut record),
                None => self.push_full(component, true, true, field_check, &mut record),
            }
        }

        for base in prefab.components() {
            let ty = base.as_any().type_id();
            if present.contains(&ty) || !self.check_type(base) {
                continue;
            }
            match self.table().id_of(ty) {
                Some(component_id) => record.removed.push(component_id),
                None => error!(
                    "component {} missing from the id table, cannot record removal",
                    base.type_name()
                ),
            }
        }
        record
    }

    /// Serialize only the listed added/changed/removed component types, as
    /// a network change set. Returns `None` when the record would be empty.
    #[must_use]
    pub fn serialize_changes(
        &self,
        manager: &EntityManager,
        entity: &EntityRef,
        added: &[TypeId],
        changed: &[TypeId],
        removed: &[TypeId],
        field_check: &dyn FieldCheck,
    ) -> Option<EntityRecord> {
        let mut record = self.envelope(manager, entity.id());
        let id = entity.id();
        for ty in added {
            match manager.component_dyn(id, *ty) {
                Some(component) => self.push_full(component, true, true, field_check, &mut record),
                None => error!("non-existent component marked as added on entity {id}"),
            }
        }
        for ty in changed {
            match manager.component_dyn(id, *ty) {
                Some(component) => self.push_full(component, false, false, field_check, &mut record),
                None => error!("non-existent component marked as changed on entity {id}"),
            }
        }
        for ty in removed {
            match self.table().id_of(*ty) {
                Some(component_id) => record.removed.push(component_id),
                None => error!("removed component missing from the id table on entity {id}"),
            }
        }
        if record.is_empty() {
            return None;
        }
        Some(record)
    }

    /// Append one component's full field set to the packed streams.
    /// `initial` is handed to the field check; a component with no passing
    /// fields is only recorded when `record_if_empty`.
    fn push_full(
        &self,
        component: &dyn Component,
        initial: bool,
        record_if_empty: bool,
        field_check: &dyn FieldCheck,
        record: &mut EntityRecord,
    ) {
        let Some(info) = self.components.registry().get_for(component) else {
            error!("unregistered component type: {}", component.type_name());
            return;
        };
        let Some(component_id) = self.table().id_of(info.type_id()) else {
            error!("component {} missing from the id table", info.name());
            return;
        };
        let mut field_count = 0u8;
        for index in 0..info.field_count() {
            let Some(field) = info.field_info(index) else {
                continue;
            };
            if !field_check.should_serialize(field, component, initial) {
                continue;
            }
            let Some(value) = component.field(index) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            record.field_ids.push(field.id());
            record.field_values.push(value);
            field_count += 1;
        }
        if field_count != 0 || record_if_empty {
            record.component_ids.push(component_id);
            record.field_counts.push(field_count);
        }
    }

    /// Append only the fields differing from `base`. A component with no
    /// differing fields is omitted entirely.
    fn push_delta(
        &self,
        base: &dyn Component,
        delta: &dyn Component,
        field_check: &dyn FieldCheck,
        record: &mut EntityRecord,
    ) {
        let Some(info) = self.components.registry().get_for(delta) else {
            error!("unregistered component type: {}", delta.type_name());
            return;
        };
        let Some(component_id) = self.table().id_of(info.type_id()) else {
            error!("component {} missing from the id table", info.name());
            return;
        };
        let mut field_count = 0u8;
        for index in 0..info.field_count() {
            let Some(field) = info.field_info(index) else {
                continue;
            };
            if !field_check.should_serialize(field, delta, true) {
                continue;
            }
            let base_value = base.field(index);
            let delta_value = delta.field(index);
            if base_value == delta_value {
                continue;
            }
            let Some(value) = delta_value else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            record.field_ids.push(field.id());
            record.field_values.push(value);
            field_count += 1;
        }
        if field_count > 0 {
            record.component_ids.push(component_id);
            record.field_counts.push(field_count);
        }
    }

    /// Build the component set a record describes: the prefab's effective
    /// set first, then the packed deltas overlaid, then the explicit
    /// removals, then the envelope attributes onto the entity info.
    fn build_components(
        &self,
        manager: &EntityManager,
        record: &EntityRecord,
    ) -> Vec<Box<dyn Component>> {
        let mut components: Vec<Box<dyn Component>> = Vec::new();

        if let Some(prefab_name) = &record.parent_prefab {
            match manager.prefabs().get(prefab_name) {
                Some(prefab) => {
                    for component in prefab.components() {
                        components.push(component.clone_boxed());
                    }
                    components.push(Box::new(EntityInfo::from_prefab(
                        prefab.name(),
                        prefab.persisted(),
                        prefab.always_relevant(),
                    )));
                }
                None => warn!("unknown parent prefab {prefab_name:?}, deserializing flat"),
            }
        }

        // Overlay the packed streams.
        let mut field_pos = 0usize;
        let field_limit = record.field_ids.len().min(record.field_values.len());
        for (index, component_id) in record.component_ids.iter().enumerate() {
            let Some(count) = record.field_counts.get(index).map(|c| *c as usize) else {
                warn!("field-count stream exhausted, dropping trailing components");
                break;
            };
            if field_pos + count > field_limit {
                warn!("field streams exhausted, dropping trailing components");
                break;
            }
            let info = self
                .table()
                .type_of(*component_id)
                .and_then(|ty| self.components.registry().get(ty));
            let Some(info) = info else {
                warn!("skipping unknown component id {component_id}");
                field_pos += count;
                continue;
            };
            if !self.component_check.should_serialize(info) {
                field_pos += count;
                continue;
            }
            let position = components
                .iter()
                .position(|c| c.as_any().type_id() == info.type_id());
            let target = match position {
                Some(position) => &mut components[position],
                None => {
                    components.push(info.create());
                    components.last_mut().expect("just pushed")
                }
            };
            for _ in 0..count {
                let field_id = record.field_ids[field_pos] as usize;
                let value = &record.field_values[field_pos];
                if !target.set_field(field_id, value) {
                    warn!("cannot apply field {field_id} onto {}", info.name());
                }
                field_pos += 1;
            }
        }

        // Explicit removals relative to the prefab.
        for component_id in &record.removed {
            match self.table().type_of(*component_id) {
                Some(ty) => components.retain(|c| c.as_any().type_id() != ty),
                None => warn!("skipping unknown removed component id {component_id}"),
            }
        }

        // Envelope attributes ride on the entity info.
        let info_position = components.iter().position(|c| c.is::<EntityInfo>());
        let info = match info_position {
            Some(position) => &mut components[position],
            None => {
                components.push(Box::new(EntityInfo::default()));
                components.last_mut().expect("just pushed")
            }
        };
        if let Some(info) = info.downcast_mut::<EntityInfo>() {
            if let Some(owner) = record.owner {
                info.owner = owner;
            }
            if let Some(always_relevant) = record.always_relevant {
                info.always_relevant = always_relevant;
            }
            if let Some(scope) = record.scope {
                info.scope = scope;
            }
        }
        components
    }

    /// Deserialize a record into a new (or reconstituted) entity, routed
    /// to the pool matching its recorded scope.
    pub fn deserialize(
        &self,
        manager: &mut EntityManager,
        record: &EntityRecord,
        events: Events,
    ) -> EntityRef {
        let components = self.build_components(manager, record);
        let entity = match record.id.filter(|_| !self.ignore_entity_ids) {
            Some(id) => manager.create_with_id(id, components, events),
            None => manager.create_in(manager.current_pool(), components, events),
        };
        if entity.exists(manager) {
            let target = match manager.scope_of(entity.id()) {
                Scope::Global => PoolId::Global,
                Scope::Sector => PoolId::Sector,
                Scope::Chunk => manager.current_pool(),
            };
            manager.move_to_pool(entity.id(), target);
        }
        entity
    }

    /// Merge a record onto a live entity: present components are applied
    /// field-by-field, recorded removals are removed.
    pub fn deserialize_onto(&self, manager: &mut EntityManager, id: EntityId, record: &EntityRecord) {
        let mut field_pos = 0usize;
        let field_limit = record.field_ids.len().min(record.field_values.len());
        for (index, component_id) in record.component_ids.iter().enumerate() {
            let Some(count) = record.field_counts.get(index).map(|c| *c as usize) else {
                warn!("field-count stream exhausted, dropping trailing components");
                break;
            };
            if field_pos + count > field_limit {
                warn!("field streams exhausted, dropping trailing components");
                break;
            }
            let info = self
                .table()
                .type_of(*component_id)
                .and_then(|ty| self.components.registry().get(ty));
            let Some(info) = info else {
                warn!("skipping unknown component id {component_id}");
                field_pos += count;
                continue;
            };
            if !self.component_check.should_serialize(info) {
                field_pos += count;
                continue;
            }
            let existing = manager.component_dyn(id, info.type_id()).map(|c| c.clone_boxed());
            let created = existing.is_none();
            let mut component = existing.unwrap_or_else(|| info.create());
            for _ in 0..count {
                let field_id = record.field_ids[field_pos] as usize;
                let value = &record.field_values[field_pos];
                if !component.set_field(field_id, value) {
                    warn!("cannot apply field {field_id} onto {}", info.name());
                }
                field_pos += 1;
            }
            if created {
                manager.add_component_boxed(id, component);
            } else {
                manager.save_component_boxed(id, component);
            }
        }
        for component_id in &record.removed {
            match self.table().type_of(*component_id) {
                Some(ty) => {
                    manager.remove_component(id, ty);
                }
                None => warn!("skipping unknown removed component id {component_id}"),
            }
        }

        if let Some(owner) = record.owner {
            manager.set_owner(id, owner);
        }
        if let Some(always_relevant) = record.always_relevant {
            manager.set_always_relevant(id, always_relevant);
        }
        if let Some(scope) = record.scope {
            if manager.scope_of(id) != scope {
                manager.set_scope(id, scope);
            }
        }
    }
}
