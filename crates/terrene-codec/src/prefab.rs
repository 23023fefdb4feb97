//! Prefab codec.
//!
//! A prefab serializes as a delta against its parent: own components that
//! override a parent component carry only the differing fields, own-only
//! components carry their full field set, and removed names are listed
//! explicitly. Deserialization layers records onto a [`PrefabData`] in the
//! order supplied, so a base definition can accumulate override records
//! before being published.

use tracing::warn;

use terrene_entity::{Prefab, PrefabData, PrefabRegistry};

use crate::check::FieldCheck;
use crate::component::ComponentCodec;
use crate::record::PrefabRecord;

/// Prefab (de)serializer over a component codec.
pub struct PrefabCodec {
    components: ComponentCodec,
}

impl PrefabCodec {
    #[must_use]
    pub fn new(components: ComponentCodec) -> Self {
        Self { components }
    }

    /// The underlying component codec.
    #[must_use]
    pub fn component_codec(&self) -> &ComponentCodec {
        &self.components
    }

    /// Serialize a prefab's own components as a delta against its parent,
    /// plus the template metadata.
    #[must_use]
    pub fn serialize(&self, prefab: &Prefab, field_check: &dyn FieldCheck) -> PrefabRecord {
        let mut components = Vec::new();
        for own in prefab.own_components() {
            let base = prefab
                .parent()
                .and_then(|parent| parent.component(own.type_name()));
            let record = match base {
                Some(base) => self.components.serialize_delta(base, own, field_check),
                None => self.components.serialize(own, field_check),
            };
            if let Some(record) = record {
                components.push(record);
            }
        }
        PrefabRecord {
            name: prefab.name().to_owned(),
            parent: prefab.parent().map(|parent| parent.name().to_owned()),
            persisted: prefab.persisted(),
            always_relevant: prefab.always_relevant(),
            components,
            removed: prefab.removed().to_vec(),
        }
    }

    /// Deserialize a record into a fresh template.
    #[must_use]
    pub fn deserialize(&self, record: &PrefabRecord, prefabs: &PrefabRegistry) -> PrefabData {
        let mut data = PrefabData::new(&record.name);
        self.deserialize_onto(&mut data, record, prefabs);
        data
    }

    /// Layer a record onto a template. Delta components resolve their base
    /// from the already-published parent prefab; unknown component types
    /// are skipped with a warning. Calling this repeatedly applies
    /// override records in supplied order.
    pub fn deserialize_onto(
        &self,
        data: &mut PrefabData,
        record: &PrefabRecord,
        prefabs: &PrefabRegistry,
    ) {
        if record.parent.is_some() {
            data.set_parent(record.parent.clone());
        }
        data.set_persisted(record.persisted);
        data.set_always_relevant(record.always_relevant);

        let parent = data.parent().and_then(|name| prefabs.get(name));
        for component_record in &record.components {
            let Some(info) = self.components.resolve(&component_record.type_key) else {
                warn!(
                    "skipping unknown component type {:?} in prefab {}",
                    component_record.type_key, record.name
                );
                continue;
            };
            let name = info.name();
            if let Some(existing) = data.component_mut(name) {
                self.components.deserialize_onto(existing, component_record);
                continue;
            }
            let mut component = match parent.as_ref().and_then(|p| p.component(name)) {
                Some(base) => base.clone_boxed(),
                None => info.create(),
            };
            self.components.deserialize_onto(&mut *component, component_record);
            data.set_component(component);
        }

        for name in &record.removed {
            data.remove_component(name);
        }
    }
}
