//! Pluggable serialize checks.
//!
//! Callers scope what the codec writes: a field check filters individual
//! fields (network replication suppresses fields irrelevant to a sync) and
//! a component check excludes whole types (persistence always excludes the
//! internal entity-info component).

use terrene_entity::{Component, ComponentTypeInfo, EntityInfo, FieldInfo};

/// Decides per field whether it is written.
pub trait FieldCheck {
    /// `initial` is true on the first sync of a component, false on
    /// incremental updates.
    fn should_serialize(&self, field: FieldInfo, component: &dyn Component, initial: bool) -> bool;
}

/// The null field check: everything is written.
#[derive(Clone, Copy, Default, Debug)]
pub struct AllFields;

impl FieldCheck for AllFields {
    fn should_serialize(&self, _: FieldInfo, _: &dyn Component, _: bool) -> bool {
        true
    }
}

/// Decides per component type whether it is written.
pub trait ComponentCheck {
    fn should_serialize(&self, info: &ComponentTypeInfo) -> bool;
}

/// The null component check: every type is written.
#[derive(Clone, Copy, Default, Debug)]
pub struct AllComponents;

impl ComponentCheck for AllComponents {
    fn should_serialize(&self, _: &ComponentTypeInfo) -> bool {
        true
    }
}

/// The persistence check: everything except the internal entity-info
/// component, whose data rides in the entity record envelope.
#[derive(Clone, Copy, Default, Debug)]
pub struct PersistedComponents;

impl ComponentCheck for PersistedComponents {
    fn should_serialize(&self, info: &ComponentTypeInfo) -> bool {
        info.type_id() != std::any::TypeId::of::<EntityInfo>()
    }
}
