//! Terrene entity core — entity/component storage for a real-time voxel
//! simulation.
//!
//! # Key Concepts
//!
//! - **Entity**: a simulated object identified by a unique, never-reused
//!   64-bit id.
//! - **Component**: a typed data record, at most one instance per type per
//!   entity, with derive-generated field reflection.
//! - **Pool**: a partition of the entity space (global / sector / one per
//!   world) owning the component storage of its entities.
//! - **Manager**: the orchestrator routing every id-addressed operation to
//!   the owning pool and fanning lifecycle notifications out to
//!   subscribers.
//! - **Prefab**: a named, inheritable template describing a default
//!   component set.
//!
//! The crate is single-threaded by design: exactly one simulation thread
//! mutates entities, so there is no internal locking. Serialization lives
//! in the sibling `terrene-codec` crate, built on the field reflection
//! defined here.

// Lets the derive macro's `::terrene_entity::` paths resolve inside this
// crate as well.
extern crate self as terrene_entity;

mod component;
mod entity_info;
mod id;
mod lifecycle;
mod manager;
mod pool;
mod prefab;
mod reference;
mod store;

pub use component::{
    Component, ComponentMeta, ComponentRegistry, ComponentTypeInfo, FieldInfo, FieldType,
    FieldValue, OwnedRefs,
};
pub use entity_info::{EntityInfo, Location, Scope, SectorConfig, SectorSimulation};
pub use id::EntityId;
pub use lifecycle::{ChangeSubscriber, DestroySubscriber, Events};
pub use manager::EntityManager;
pub use pool::{EntityPool, PoolId};
pub use prefab::{Prefab, PrefabData, PrefabError, PrefabRegistry};
pub use reference::EntityRef;
pub use store::ComponentStore;

pub use terrene_entity_derive::Component;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Component, ComponentRegistry, EntityId, EntityManager, EntityRef, Events, FieldValue,
        PoolId, PrefabData, Scope,
    };
}
