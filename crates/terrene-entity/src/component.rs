//! Component trait, field reflection and type registration.
//!
//! Components are plain data structs attached to entities, at most one
//! instance of a type per entity. Instead of runtime reflection, every
//! component carries a small vtable generated by `#[derive(Component)]`:
//! a stable type name, an ordered field-name table, and get/set access to
//! each field as a tagged [`FieldValue`]. The serialization codec and the
//! prefab delta machinery are built entirely on this surface.

use std::any::{Any, TypeId};
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::id::EntityId;

/// Owned entity references enumerated from a component's fields.
pub type OwnedRefs = SmallVec<[EntityId; 4]>;

/// A tagged field value.
///
/// This is the primitive-or-nested value a component field converts to and
/// from when crossing the serialization boundary. Comparing two values with
/// `==` is the diff primitive used by all delta encoding.
#[derive(Clone, PartialEq, Debug)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Entity(EntityId),
    F32List(Vec<f32>),
    I64List(Vec<i64>),
    StrList(Vec<String>),
}

impl FieldValue {
    /// Whether this is the null value.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Conversion between a concrete field type and [`FieldValue`].
///
/// The derive macro calls through this trait for every field of a component.
pub trait FieldType: Sized {
    /// Convert the field to a tagged value.
    fn to_field(&self) -> FieldValue;

    /// Convert a tagged value back. Returns `None` on a tag mismatch, in
    /// which case the field is left untouched by deserialization.
    fn from_field(value: &FieldValue) -> Option<Self>;
}

impl FieldType for bool {
    fn to_field(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for i32 {
    fn to_field(&self) -> FieldValue {
        FieldValue::I32(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for i64 {
    fn to_field(&self) -> FieldValue {
        FieldValue::I64(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for u32 {
    fn to_field(&self) -> FieldValue {
        FieldValue::I64(i64::from(*self))
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FieldType for u64 {
    fn to_field(&self) -> FieldValue {
        FieldValue::U64(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::U64(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for f32 {
    fn to_field(&self) -> FieldValue {
        FieldValue::F32(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::F32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for f64 {
    fn to_field(&self) -> FieldValue {
        FieldValue::F64(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for String {
    fn to_field(&self) -> FieldValue {
        FieldValue::Str(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Str(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FieldType for Vec<u8> {
    fn to_field(&self) -> FieldValue {
        FieldValue::Bytes(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bytes(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FieldType for EntityId {
    fn to_field(&self) -> FieldValue {
        FieldValue::Entity(*self)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Entity(v) => Some(*v),
            _ => None,
        }
    }
}

impl FieldType for [f32; 3] {
    fn to_field(&self) -> FieldValue {
        FieldValue::F32List(self.to_vec())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::F32List(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

impl FieldType for [f32; 4] {
    fn to_field(&self) -> FieldValue {
        FieldValue::F32List(self.to_vec())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::F32List(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

impl FieldType for Vec<i64> {
    fn to_field(&self) -> FieldValue {
        FieldValue::I64List(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64List(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FieldType for Vec<String> {
    fn to_field(&self) -> FieldValue {
        FieldValue::StrList(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::StrList(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    fn to_field(&self) -> FieldValue {
        match self {
            Some(v) => v.to_field(),
            None => FieldValue::Null,
        }
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => Some(None),
            other => T::from_field(other).map(Some),
        }
    }
}

/// Data attached to an entity.
///
/// Implemented via `#[derive(Component)]`. The derive also requires `Clone`
/// and `Default` on the type, and emits the [`ComponentMeta`] impl used for
/// registration.
pub trait Component: Any {
    /// The stable type name used for registration and serialization.
    fn type_name(&self) -> &'static str;

    /// Ordered field-name table. Field indices are stable per type and
    /// double as the compact field ids on the wire.
    fn field_names(&self) -> &'static [&'static str];

    /// Read a field by index.
    fn field(&self, index: usize) -> Option<FieldValue>;

    /// Write a field by index. Returns `false` on an out-of-range index or
    /// a value-tag mismatch; the field is left untouched in both cases.
    fn set_field(&mut self, index: usize, value: &FieldValue) -> bool;

    /// Clone into a new boxed component.
    fn clone_boxed(&self) -> Box<dyn Component>;

    /// Entity references this component owns, for cascading copy/delete.
    /// Fields marked `#[component(owned)]` are enumerated here.
    fn owned_references(&self) -> OwnedRefs {
        OwnedRefs::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn Component {
    /// Whether the component is of concrete type `T`.
    #[must_use]
    pub fn is<T: Component>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to a concrete component type.
    #[must_use]
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcast to a concrete component type, mutably.
    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Downcast a boxed component into its concrete type, by value.
    pub fn downcast<T: Component>(self: Box<Self>) -> Result<Box<T>, Box<dyn Any>> {
        self.into_any().downcast::<T>()
    }
}

impl Clone for Box<dyn Component> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

impl fmt::Debug for Box<dyn Component> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())?;
        f.debug_map()
            .entries(
                self.field_names()
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name, self.field(i))),
            )
            .finish()
    }
}

/// Static metadata for a concrete component type.
///
/// Emitted by the derive macro alongside the [`Component`] impl.
pub trait ComponentMeta: Component + Clone + Default {
    /// The stable type name.
    const NAME: &'static str;
    /// Ordered field-name table.
    const FIELDS: &'static [&'static str];
}

/// Metadata for one field of a component, handed to serialize checks.
#[derive(Clone, Copy, Debug)]
pub struct FieldInfo {
    /// Field index within the component, which is also the compact wire id.
    pub index: usize,
    /// Field name.
    pub name: &'static str,
}

impl FieldInfo {
    /// The compact wire id for this field.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.index as u8
    }
}

/// Runtime information about a registered component type.
pub struct ComponentTypeInfo {
    type_id: TypeId,
    name: &'static str,
    fields: &'static [&'static str],
    create: fn() -> Box<dyn Component>,
}

impl ComponentTypeInfo {
    /// Build type info for a concrete component type.
    #[must_use]
    pub fn of<T: ComponentMeta>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::NAME,
            fields: T::FIELDS,
            create: || Box::new(T::default()),
        }
    }

    /// The Rust `TypeId` of the component type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The stable type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Ordered field-name table.
    #[must_use]
    pub const fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Number of fields.
    #[must_use]
    pub const fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Look up a field index by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == name)
    }

    /// Field metadata by index.
    #[must_use]
    pub fn field_info(&self, index: usize) -> Option<FieldInfo> {
        self.fields
            .get(index)
            .map(|name| FieldInfo { index, name: *name })
    }

    /// Create a default-initialized instance of the type.
    #[must_use]
    pub fn create(&self) -> Box<dyn Component> {
        (self.create)()
    }
}

impl fmt::Debug for ComponentTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTypeInfo")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Registry of component types.
///
/// Maps Rust types to stable names and constructors. This is the metadata
/// seam the codec consumes; registration is explicit and idempotent.
/// The built-in components ([`crate::EntityInfo`], [`crate::SectorSimulation`],
/// [`crate::Location`]) are registered on construction.
pub struct ComponentRegistry {
    by_type: FxHashMap<TypeId, usize>,
    by_name: FxHashMap<&'static str, usize>,
    infos: Vec<ComponentTypeInfo>,
}

impl ComponentRegistry {
    /// Create a registry with the built-in component types registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            by_type: FxHashMap::default(),
            by_name: FxHashMap::default(),
            infos: Vec::new(),
        };
        registry.register::<crate::EntityInfo>();
        registry.register::<crate::SectorSimulation>();
        registry.register::<crate::Location>();
        registry
    }

    /// Register a component type. Idempotent.
    pub fn register<T: ComponentMeta>(&mut self) {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return;
        }
        let info = ComponentTypeInfo::of::<T>();
        let index = self.infos.len();
        self.by_name.insert(info.name, index);
        self.by_type.insert(type_id, index);
        self.infos.push(info);
    }

    /// Type info by Rust `TypeId`.
    #[must_use]
    pub fn get(&self, type_id: TypeId) -> Option<&ComponentTypeInfo> {
        self.by_type.get(&type_id).map(|&i| &self.infos[i])
    }

    /// Type info by stable name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&ComponentTypeInfo> {
        self.by_name.get(name).map(|&i| &self.infos[i])
    }

    /// Type info for a live component instance.
    #[must_use]
    pub fn get_for(&self, component: &dyn Component) -> Option<&ComponentTypeInfo> {
        self.get(component.as_any().type_id())
    }

    /// Iterate registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentTypeInfo> {
        self.infos.iter()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrene_entity_derive::Component;

    #[derive(Component, Clone, Default, PartialEq, Debug)]
    struct HealthComponent {
        current: i32,
        max: i32,
    }

    #[derive(Component, Clone, Default, Debug)]
    #[component(name = "Inventory")]
    struct InventoryComponent {
        slots: Vec<i64>,
        #[component(owned)]
        container: EntityId,
    }

    #[test]
    fn derive_strips_component_suffix() {
        let health = HealthComponent::default();
        assert_eq!(health.type_name(), "Health");
        assert_eq!(HealthComponent::NAME, "Health");
        assert_eq!(HealthComponent::FIELDS, &["current", "max"]);
    }

    #[test]
    fn derive_honors_name_override() {
        assert_eq!(InventoryComponent::NAME, "Inventory");
    }

    #[test]
    fn field_access_by_index() {
        let mut health = HealthComponent {
            current: 80,
            max: 100,
        };
        assert_eq!(health.field(0), Some(FieldValue::I32(80)));
        assert_eq!(health.field(1), Some(FieldValue::I32(100)));
        assert_eq!(health.field(2), None);

        assert!(health.set_field(0, &FieldValue::I32(50)));
        assert_eq!(health.current, 50);

        // tag mismatch leaves the field alone
        assert!(!health.set_field(0, &FieldValue::Str("bad".into())));
        assert_eq!(health.current, 50);
    }

    #[test]
    fn owned_references_enumerated() {
        let inv = InventoryComponent {
            slots: vec![1, 2],
            container: EntityId::from_raw(9),
        };
        let owned = inv.owned_references();
        assert_eq!(owned.as_slice(), &[EntityId::from_raw(9)]);
    }

    #[test]
    fn registry_round_trip() {
        let mut registry = ComponentRegistry::new();
        registry.register::<HealthComponent>();
        registry.register::<HealthComponent>();

        let info = registry.get_by_name("Health").unwrap();
        assert_eq!(info.type_id(), TypeId::of::<HealthComponent>());
        assert_eq!(info.field_index("max"), Some(1));

        let fresh = info.create();
        assert!(fresh.is::<HealthComponent>());

        let health = HealthComponent::default();
        assert_eq!(registry.get_for(&health).unwrap().name(), "Health");
    }

    #[test]
    fn boxed_clone_is_deep() {
        let boxed: Box<dyn Component> = Box::new(HealthComponent {
            current: 10,
            max: 10,
        });
        let copy = boxed.clone();
        assert_eq!(
            copy.downcast_ref::<HealthComponent>().unwrap(),
            &HealthComponent {
                current: 10,
                max: 10
            }
        );
    }

    #[test]
    fn option_field_round_trip() {
        let some: Option<String> = Some("base:tree".into());
        assert_eq!(some.to_field(), FieldValue::Str("base:tree".into()));
        assert_eq!(
            Option::<String>::from_field(&FieldValue::Null),
            Some(None)
        );
    }
}
