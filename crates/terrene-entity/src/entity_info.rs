//! Built-in components.
//!
//! Entity attributes (scope, owner, persistence flags, parent prefab) live
//! in the distinguished [`EntityInfo`] component so they flow through the
//! same storage and serialization paths as user components. Persistence
//! excludes [`EntityInfo`] itself; its data rides in the entity record
//! envelope instead.

use crate::component::{FieldType, FieldValue};
use crate::id::EntityId;
use terrene_entity_derive::Component;

/// Pool-affinity classification of an entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Scope {
    /// Lives in the global pool, independent of any world.
    Global,
    /// Simulates in the sector pool, independent of chunk loading.
    Sector,
    /// Lives in the current world pool, loaded and unloaded with chunks.
    #[default]
    Chunk,
}

impl Scope {
    /// Wire discriminant.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Scope::Global => 0,
            Scope::Sector => 1,
            Scope::Chunk => 2,
        }
    }

    /// Decode a wire discriminant.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Scope::Global),
            1 => Some(Scope::Sector),
            2 => Some(Scope::Chunk),
            _ => None,
        }
    }
}

impl FieldType for Scope {
    fn to_field(&self) -> FieldValue {
        FieldValue::I64(i64::from(self.as_u8()))
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64(v) => u8::try_from(*v).ok().and_then(Scope::from_u8),
            _ => None,
        }
    }
}

/// The distinguished entity-attributes component.
///
/// Every live entity carries exactly one. The `persisted` flag is fixed at
/// creation; the manager restores it if a later save tries to flip it.
#[derive(Component, Clone, PartialEq, Debug)]
pub struct EntityInfo {
    /// Name of the prefab this entity was instantiated from, if any.
    pub parent_prefab: Option<String>,
    /// Entity responsible for this one's lifetime, or null.
    pub owner: EntityId,
    /// Whether the entity is written to world saves.
    pub persisted: bool,
    /// Whether the entity is replicated regardless of distance.
    pub always_relevant: bool,
    /// Pool-affinity scope.
    pub scope: Scope,
}

impl Default for EntityInfo {
    fn default() -> Self {
        Self {
            parent_prefab: None,
            owner: EntityId::NULL,
            persisted: true,
            always_relevant: false,
            scope: Scope::Chunk,
        }
    }
}

impl EntityInfo {
    /// Info for an entity instantiated from a prefab, inheriting the
    /// prefab's persistence flags.
    #[must_use]
    pub fn from_prefab(name: &str, persisted: bool, always_relevant: bool) -> Self {
        Self {
            parent_prefab: Some(name.to_owned()),
            persisted,
            always_relevant,
            ..Self::default()
        }
    }
}

/// Simulation bounds for sector-scope entities.
///
/// Present iff the entity's scope is [`Scope::Sector`]. Deltas are upper
/// bounds, in milliseconds, on the simulated time step handed to the entity
/// while its chunk is unloaded vs loaded.
#[derive(Component, Clone, PartialEq, Debug)]
pub struct SectorSimulation {
    pub unloaded_max_delta: u64,
    pub loaded_max_delta: u64,
}

impl Default for SectorSimulation {
    fn default() -> Self {
        SectorConfig::default().simulation()
    }
}

/// Configured delta bounds applied when an entity enters sector scope.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SectorConfig {
    pub unloaded_max_delta: u64,
    pub loaded_max_delta: u64,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            unloaded_max_delta: 10_000,
            loaded_max_delta: 1_000,
        }
    }
}

impl SectorConfig {
    /// Build the simulation component carrying these bounds.
    #[must_use]
    pub const fn simulation(self) -> SectorSimulation {
        SectorSimulation {
            unloaded_max_delta: self.unloaded_max_delta,
            loaded_max_delta: self.loaded_max_delta,
        }
    }
}

/// World-space position and rotation.
#[derive(Component, Clone, PartialEq, Debug)]
pub struct Location {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Default for Location {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Location {
    /// A location at `position` with identity rotation.
    #[must_use]
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component as _;

    #[test]
    fn scope_round_trip() {
        for scope in [Scope::Global, Scope::Sector, Scope::Chunk] {
            assert_eq!(Scope::from_u8(scope.as_u8()), Some(scope));
            assert_eq!(Scope::from_field(&scope.to_field()), Some(scope));
        }
        assert_eq!(Scope::from_u8(3), None);
    }

    #[test]
    fn entity_info_fields() {
        let info = EntityInfo::from_prefab("base:tree", true, false);
        assert_eq!(info.type_name(), "EntityInfo");
        assert_eq!(
            info.field(0),
            Some(FieldValue::Str("base:tree".into()))
        );
        assert_eq!(info.scope, Scope::Chunk);
        assert!(info.persisted);
    }

    #[test]
    fn sector_defaults_follow_config() {
        let sim = SectorSimulation::default();
        let config = SectorConfig::default();
        assert_eq!(sim.unloaded_max_delta, config.unloaded_max_delta);
        assert_eq!(sim.loaded_max_delta, config.loaded_max_delta);
    }
}
