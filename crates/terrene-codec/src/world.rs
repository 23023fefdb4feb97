//! World snapshot codec.
//!
//! A snapshot records the session component-type table, every prefab,
//! every persisted entity (or all of them under [`Verbosity::All`]) and
//! the next-id counter. Loading is best-effort: unknown component types
//! and unresolvable prefabs are dropped with a warning, never aborting
//! the pass.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;

use hashbrown::HashMap;
use tracing::warn;

use terrene_entity::{ComponentRegistry, EntityManager, Events};

use crate::check::{AllFields, PersistedComponents};
use crate::component::{ComponentCodec, ComponentIdTable};
use crate::entity::EntityCodec;
use crate::error::CodecResult;
use crate::prefab::PrefabCodec;
use crate::record::{PrefabRecord, WorldRecord};

/// Which entities a snapshot includes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Verbosity {
    /// Only entities whose info marks them persisted.
    #[default]
    PersistedOnly,
    /// Every active entity, persisted or not.
    All,
}

/// Whole-world (de)serializer.
pub struct WorldCodec {
    registry: Rc<ComponentRegistry>,
}

impl WorldCodec {
    #[must_use]
    pub fn new(registry: Rc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    fn entity_codec(&self, table: ComponentIdTable) -> EntityCodec {
        EntityCodec::new(Rc::clone(&self.registry), table)
            .with_component_check(Box::new(PersistedComponents))
    }

    fn prefab_codec(&self, table: ComponentIdTable) -> PrefabCodec {
        PrefabCodec::new(
            ComponentCodec::new(Rc::clone(&self.registry))
                .with_id_table(table)
                .with_field_ids(true),
        )
    }

    /// Serialize the world: a fresh id table over every registered
    /// component type, all prefabs, the included entities and the next-id
    /// counter.
    #[must_use]
    pub fn serialize(&self, manager: &EntityManager, verbosity: Verbosity) -> WorldRecord {
        let component_types: Vec<String> = self
            .registry
            .iter()
            .map(|info| info.name().to_owned())
            .collect();
        let table = ComponentIdTable::from_registry(&self.registry);
        let prefab_codec = self.prefab_codec(table.clone());
        let entity_codec = self.entity_codec(table);

        let prefabs: Vec<PrefabRecord> = manager
            .prefabs()
            .iter()
            .map(|prefab| prefab_codec.serialize(prefab, &AllFields))
            .collect();

        let mut entities = Vec::new();
        for entity in manager.all_entities() {
            if verbosity == Verbosity::PersistedOnly && !entity.is_persistent(manager) {
                continue;
            }
            if let Some(record) = entity_codec.serialize(manager, &entity, true, &AllFields) {
                entities.push(record);
            }
        }

        WorldRecord {
            component_types,
            prefabs,
            entities,
            next_id: manager.next_id(),
        }
    }

    /// Load a snapshot into the manager.
    ///
    /// The id table is rebuilt from the recorded type names, prefabs not
    /// already known are created (a work queue keyed by missing-parent
    /// name retries children once their parent appears; unresolvable
    /// leftovers are dropped), entities are created or merged with
    /// lifecycle events suppressed, and the id counter is restored. The
    /// counter is raised before the entity pass so stored ids pass the
    /// allocation guard.
    pub fn deserialize(&self, manager: &mut EntityManager, record: &WorldRecord) {
        let table = ComponentIdTable::from_names(&self.registry, &record.component_types);
        let prefab_codec = self.prefab_codec(table.clone());
        let entity_codec = self.entity_codec(table);

        let mut work: VecDeque<&PrefabRecord> = record.prefabs.iter().collect();
        let mut pending: HashMap<String, Vec<&PrefabRecord>> = HashMap::new();
        while let Some(prefab_record) = work.pop_front() {
            if manager.prefabs().exists(&prefab_record.name) {
                continue;
            }
            if let Some(parent) = &prefab_record.parent {
                if !manager.prefabs().exists(parent) {
                    pending.entry(parent.clone()).or_default().push(prefab_record);
                    continue;
                }
            }
            let data = prefab_codec.deserialize(prefab_record, manager.prefabs());
            match manager.prefabs_mut().publish(data) {
                Ok(prefab) => {
                    if let Some(children) = pending.remove(prefab.name()) {
                        work.extend(children);
                    }
                }
                Err(err) => warn!("dropping prefab {}: {err}", prefab_record.name),
            }
        }
        for (parent, children) in pending {
            for child in children {
                warn!(
                    "dropping prefab {} with unresolved parent {parent}",
                    child.name
                );
            }
        }

        manager.set_next_id(record.next_id.max(manager.next_id()));
        for entity_record in &record.entities {
            entity_codec.deserialize(manager, entity_record, Events::Suppress);
        }
    }

    /// Serialize straight into a writer.
    pub fn save_to<W: Write>(
        &self,
        manager: &EntityManager,
        verbosity: Verbosity,
        writer: &mut W,
    ) -> CodecResult<()> {
        self.serialize(manager, verbosity).encode(writer)
    }

    /// Decode a snapshot from a reader and load it.
    pub fn load_from<R: Read>(&self, manager: &mut EntityManager, reader: &mut R) -> CodecResult<()> {
        let record = WorldRecord::decode(reader)?;
        self.deserialize(manager, &record);
        Ok(())
    }
}
