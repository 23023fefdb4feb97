//! Terrene serialization codec.
//!
//! Four layered encodings over one primitive, the tagged field-value
//! record:
//!
//! - **Component codec**: component ↔ record, including the per-field
//!   `diff(base, delta)` primitive both prefab deltas and network deltas
//!   reuse.
//! - **Entity codec**: a whole entity as packed parallel streams,
//!   optionally delta-encoded against its parent prefab.
//! - **Prefab codec**: a template as a delta against its parent, with
//!   multi-pass override layering on load.
//! - **World codec**: a snapshot of component-type table, prefabs,
//!   persisted entities and the id counter.
//!
//! Encoding is synchronous CPU work with no internal state beyond the
//! per-session id tables; run it on the simulation thread, or on a halted
//! world. Loading is best-effort: unknown types and unreadable records
//! degrade per-record with a logged warning.

mod check;
mod component;
mod entity;
mod error;
mod prefab;
mod record;
mod wire;
mod world;

pub use check::{AllComponents, AllFields, ComponentCheck, FieldCheck, PersistedComponents};
pub use component::{ComponentCodec, ComponentIdTable};
pub use entity::EntityCodec;
pub use error::{CodecError, CodecResult};
pub use prefab::PrefabCodec;
pub use record::{
    ComponentRecord, EntityRecord, FieldKey, PrefabRecord, TypeKey, WorldRecord, read_value,
    write_value,
};
pub use world::{Verbosity, WorldCodec};
