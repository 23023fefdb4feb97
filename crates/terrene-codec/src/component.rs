//! Component codec.
//!
//! Converts components to and from tagged field-value records. With an id
//! table configured, component types and fields are written as compact
//! numeric ids; without one they fall back to stable name strings.
//! Deserialization is always a partial merge: only fields present in the
//! record are applied, everything else is left untouched.

use std::any::TypeId;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{error, warn};

use terrene_entity::{Component, ComponentRegistry, ComponentTypeInfo, FieldInfo};

use crate::check::FieldCheck;
use crate::record::{ComponentRecord, FieldKey, TypeKey};

/// Session mapping between component types and compact numeric ids.
#[derive(Clone, Default, Debug)]
pub struct ComponentIdTable {
    by_id: FxHashMap<u32, TypeId>,
    by_type: FxHashMap<TypeId, u32>,
}

impl ComponentIdTable {
    /// Assign sequential ids to every registered type, in registration
    /// order. This is how a serialize pass builds its table.
    #[must_use]
    pub fn from_registry(registry: &ComponentRegistry) -> Self {
        let mut table = Self::default();
        for (index, info) in registry.iter().enumerate() {
            table.insert(index as u32, info.type_id());
        }
        table
    }

    /// Rebuild a table from recorded type names. Unknown names leave holes
    /// whose records will be skipped with a warning later.
    #[must_use]
    pub fn from_names(registry: &ComponentRegistry, names: &[String]) -> Self {
        let mut table = Self::default();
        for (index, name) in names.iter().enumerate() {
            match registry.get_by_name(name) {
                Some(info) => table.insert(index as u32, info.type_id()),
                None => warn!("unknown component type {name:?} in id table"),
            }
        }
        table
    }

    /// Add one mapping.
    pub fn insert(&mut self, id: u32, ty: TypeId) {
        self.by_id.insert(id, ty);
        self.by_type.insert(ty, id);
    }

    /// The type mapped to a numeric id.
    #[must_use]
    pub fn type_of(&self, id: u32) -> Option<TypeId> {
        self.by_id.get(&id).copied()
    }

    /// The numeric id mapped to a type.
    #[must_use]
    pub fn id_of(&self, ty: TypeId) -> Option<u32> {
        self.by_type.get(&ty).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Stateless-per-call component (de)serializer.
pub struct ComponentCodec {
    registry: Rc<ComponentRegistry>,
    id_table: Option<ComponentIdTable>,
    use_field_ids: bool,
}

impl ComponentCodec {
    /// A codec writing name keys for types and fields.
    #[must_use]
    pub fn new(registry: Rc<ComponentRegistry>) -> Self {
        Self {
            registry,
            id_table: None,
            use_field_ids: false,
        }
    }

    /// Write component types as compact ids from the given table.
    #[must_use]
    pub fn with_id_table(mut self, table: ComponentIdTable) -> Self {
        self.id_table = Some(table);
        self
    }

    /// Write fields as compact index ids instead of names.
    #[must_use]
    pub fn with_field_ids(mut self, use_field_ids: bool) -> Self {
        self.use_field_ids = use_field_ids;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn id_table(&self) -> Option<&ComponentIdTable> {
        self.id_table.as_ref()
    }

    fn type_key_for(&self, info: &ComponentTypeInfo) -> TypeKey {
        self.id_table
            .as_ref()
            .and_then(|table| table.id_of(info.type_id()))
            .map_or_else(|| TypeKey::Name(info.name().to_owned()), TypeKey::Id)
    }

    fn field_key_for(&self, field: FieldInfo) -> FieldKey {
        if self.use_field_ids {
            FieldKey::Id(field.id())
        } else {
            FieldKey::Name(field.name.to_owned())
        }
    }

    /// Resolve a record's type key against the registry and id table.
    #[must_use]
    pub fn resolve(&self, key: &TypeKey) -> Option<&ComponentTypeInfo> {
        match key {
            TypeKey::Id(id) => {
                let ty = self.id_table.as_ref()?.type_of(*id)?;
                self.registry.get(ty)
            }
            TypeKey::Name(name) => self.registry.get_by_name(name),
        }
    }

    /// Serialize a component, one field entry per field passing the check.
    /// Null field values are not written. Returns `None` (logged) for an
    /// unregistered component type.
    #[must_use]
    pub fn serialize(
        &self,
        component: &dyn Component,
        check: &dyn FieldCheck,
    ) -> Option<ComponentRecord> {
        let Some(info) = self.registry.get_for(component) else {
            error!("unregistered component type: {}", component.type_name());
            return None;
        };
        let mut fields = Vec::new();
        for index in 0..info.field_count() {
            let field = info.field_info(index)?;
            if !check.should_serialize(field, component, true) {
                continue;
            }
            match component.field(index) {
                Some(value) if !value.is_null() => {
                    fields.push((self.field_key_for(field), value));
                }
                _ => {}
            }
        }
        Some(ComponentRecord {
            type_key: self.type_key_for(info),
            fields,
        })
    }

    /// Serialize only the fields whose value differs between `base` and
    /// `delta`. Returns `None` when nothing differs. This is the single
    /// diff primitive reused by prefab deltas and network deltas alike.
    #[must_use]
    pub fn serialize_delta(
        &self,
        base: &dyn Component,
        delta: &dyn Component,
        check: &dyn FieldCheck,
    ) -> Option<ComponentRecord> {
        let Some(info) = self.registry.get_for(base) else {
            error!("unregistered component type: {}", base.type_name());
            return None;
        };
        if base.as_any().type_id() != delta.as_any().type_id() {
            error!(
                "delta type mismatch: {} vs {}",
                base.type_name(),
                delta.type_name()
            );
            return None;
        }
        let mut fields = Vec::new();
        for index in 0..info.field_count() {
            let field = info.field_info(index)?;
            if !check.should_serialize(field, delta, true) {
                continue;
            }
            let base_value = base.field(index);
            let delta_value = delta.field(index);
            if base_value == delta_value {
                continue;
            }
            match delta_value {
                Some(value) if !value.is_null() => {
                    fields.push((self.field_key_for(field), value));
                }
                _ => {}
            }
        }
        if fields.is_empty() {
            return None;
        }
        Some(ComponentRecord {
            type_key: self.type_key_for(info),
            fields,
        })
    }

    /// Deserialize a fresh component. Unknown types are skipped with a
    /// warning, never an abort.
    #[must_use]
    pub fn deserialize(&self, record: &ComponentRecord) -> Option<Box<dyn Component>> {
        let Some(info) = self.resolve(&record.type_key) else {
            warn!("unable to deserialize unknown component type {:?}", record.type_key);
            return None;
        };
        let mut component = info.create();
        self.apply(&mut *component, info, record);
        Some(component)
    }

    /// Apply a record onto an existing component. Fields absent from the
    /// record, and fields that fail to apply, are left untouched.
    pub fn deserialize_onto(&self, target: &mut dyn Component, record: &ComponentRecord) {
        let Some(info) = self.registry.get_for(target) else {
            error!("unregistered component type: {}", target.type_name());
            return;
        };
        self.apply(target, info, record);
    }

    fn apply(&self, target: &mut dyn Component, info: &ComponentTypeInfo, record: &ComponentRecord) {
        for (key, value) in &record.fields {
            let index = match key {
                FieldKey::Id(id) => Some(*id as usize),
                FieldKey::Name(name) => info.field_index(name),
            };
            match index {
                Some(index) if index < info.field_count() => {
                    if !target.set_field(index, value) {
                        warn!(
                            "cannot apply field {key:?} onto {}, value tag mismatch",
                            info.name()
                        );
                    }
                }
                _ => warn!("cannot apply unknown field {key:?} onto {}", info.name()),
            }
        }
    }
}
