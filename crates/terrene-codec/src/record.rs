//! Wire record shapes.
//!
//! Everything the codec produces or consumes is one of these records, each
//! with a byte-for-byte round-tripping `encode`/`decode` pair. Values are
//! self-describing (1-byte tag + payload) so a reader can always skip a
//! field it does not understand; world snapshots additionally
//! length-prefix each prefab and entity record so one broken record never
//! poisons the rest of the stream.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use terrene_entity::{EntityId, FieldValue, Scope};

use crate::error::{CodecError, CodecResult};
use crate::wire;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I32: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_U64: u8 = 4;
const TAG_F32: u8 = 5;
const TAG_F64: u8 = 6;
const TAG_STR: u8 = 7;
const TAG_BYTES: u8 = 8;
const TAG_ENTITY: u8 = 9;
const TAG_F32_LIST: u8 = 10;
const TAG_I64_LIST: u8 = 11;
const TAG_STR_LIST: u8 = 12;

/// Encode one tagged field value.
pub fn write_value<W: Write>(writer: &mut W, value: &FieldValue) -> CodecResult<()> {
    match value {
        FieldValue::Null => writer.write_u8(TAG_NULL)?,
        FieldValue::Bool(v) => {
            writer.write_u8(TAG_BOOL)?;
            wire::write_bool(writer, *v)?;
        }
        FieldValue::I32(v) => {
            writer.write_u8(TAG_I32)?;
            writer.write_i32::<LittleEndian>(*v)?;
        }
        FieldValue::I64(v) => {
            writer.write_u8(TAG_I64)?;
            writer.write_i64::<LittleEndian>(*v)?;
        }
        FieldValue::U64(v) => {
            writer.write_u8(TAG_U64)?;
            wire::write_var_u64(writer, *v)?;
        }
        FieldValue::F32(v) => {
            writer.write_u8(TAG_F32)?;
            writer.write_f32::<LittleEndian>(*v)?;
        }
        FieldValue::F64(v) => {
            writer.write_u8(TAG_F64)?;
            writer.write_f64::<LittleEndian>(*v)?;
        }
        FieldValue::Str(v) => {
            writer.write_u8(TAG_STR)?;
            wire::write_string(writer, v)?;
        }
        FieldValue::Bytes(v) => {
            writer.write_u8(TAG_BYTES)?;
            wire::write_bytes(writer, v)?;
        }
        FieldValue::Entity(v) => {
            writer.write_u8(TAG_ENTITY)?;
            wire::write_var_u64(writer, v.as_raw())?;
        }
        FieldValue::F32List(v) => {
            writer.write_u8(TAG_F32_LIST)?;
            wire::write_len(writer, v.len())?;
            for item in v {
                writer.write_f32::<LittleEndian>(*item)?;
            }
        }
        FieldValue::I64List(v) => {
            writer.write_u8(TAG_I64_LIST)?;
            wire::write_len(writer, v.len())?;
            for item in v {
                writer.write_i64::<LittleEndian>(*item)?;
            }
        }
        FieldValue::StrList(v) => {
            writer.write_u8(TAG_STR_LIST)?;
            wire::write_len(writer, v.len())?;
            for item in v {
                wire::write_string(writer, item)?;
            }
        }
    }
    Ok(())
}

/// Decode one tagged field value.
pub fn read_value<R: Read>(reader: &mut R) -> CodecResult<FieldValue> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        TAG_NULL => FieldValue::Null,
        TAG_BOOL => FieldValue::Bool(wire::read_bool(reader)?),
        TAG_I32 => FieldValue::I32(reader.read_i32::<LittleEndian>()?),
        TAG_I64 => FieldValue::I64(reader.read_i64::<LittleEndian>()?),
        TAG_U64 => FieldValue::U64(wire::read_var_u64(reader)?),
        TAG_F32 => FieldValue::F32(reader.read_f32::<LittleEndian>()?),
        TAG_F64 => FieldValue::F64(reader.read_f64::<LittleEndian>()?),
        TAG_STR => FieldValue::Str(wire::read_string(reader)?),
        TAG_BYTES => FieldValue::Bytes(wire::read_byte_vec(reader)?),
        TAG_ENTITY => FieldValue::Entity(EntityId::from_raw(wire::read_var_u64(reader)?)),
        TAG_F32_LIST => {
            let len = wire::read_len(reader)?;
            let mut items = Vec::with_capacity(len.min(wire::MAX_LEN));
            for _ in 0..len {
                items.push(reader.read_f32::<LittleEndian>()?);
            }
            FieldValue::F32List(items)
        }
        TAG_I64_LIST => {
            let len = wire::read_len(reader)?;
            let mut items = Vec::with_capacity(len.min(wire::MAX_LEN));
            for _ in 0..len {
                items.push(reader.read_i64::<LittleEndian>()?);
            }
            FieldValue::I64List(items)
        }
        TAG_STR_LIST => {
            let len = wire::read_len(reader)?;
            let mut items = Vec::with_capacity(len.min(wire::MAX_LEN));
            for _ in 0..len {
                items.push(wire::read_string(reader)?);
            }
            FieldValue::StrList(items)
        }
        other => return Err(CodecError::InvalidValueTag(other)),
    })
}

/// A field identifier: a compact numeric id (preferred, requires the field
/// table of the owning component type) or a stable name string.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FieldKey {
    Id(u8),
    Name(String),
}

impl FieldKey {
    fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        match self {
            FieldKey::Id(id) => {
                writer.write_u8(0)?;
                writer.write_u8(*id)?;
            }
            FieldKey::Name(name) => {
                writer.write_u8(1)?;
                wire::write_string(writer, name)?;
            }
        }
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        match reader.read_u8()? {
            0 => Ok(FieldKey::Id(reader.read_u8()?)),
            1 => Ok(FieldKey::Name(wire::read_string(reader)?)),
            other => Err(CodecError::InvalidKeyTag(other)),
        }
    }
}

/// A component-type identifier: a session id from the id table, or the
/// stable type name when no table is configured.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeKey {
    Id(u32),
    Name(String),
}

impl TypeKey {
    fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        match self {
            TypeKey::Id(id) => {
                writer.write_u8(0)?;
                wire::write_var_u32(writer, *id)?;
            }
            TypeKey::Name(name) => {
                writer.write_u8(1)?;
                wire::write_string(writer, name)?;
            }
        }
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        match reader.read_u8()? {
            0 => Ok(TypeKey::Id(wire::read_var_u32(reader)?)),
            1 => Ok(TypeKey::Name(wire::read_string(reader)?)),
            other => Err(CodecError::InvalidKeyTag(other)),
        }
    }
}

/// One serialized component: an ordered list of field-key/value entries.
#[derive(Clone, PartialEq, Debug)]
pub struct ComponentRecord {
    pub type_key: TypeKey,
    pub fields: Vec<(FieldKey, FieldValue)>,
}

impl ComponentRecord {
    /// Whether the record carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        self.type_key.encode(writer)?;
        wire::write_len(writer, self.fields.len())?;
        for (key, value) in &self.fields {
            key.encode(writer)?;
            write_value(writer, value)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let type_key = TypeKey::decode(reader)?;
        let count = wire::read_len(reader)?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let key = FieldKey::decode(reader)?;
            let value = read_value(reader)?;
            fields.push((key, value));
        }
        Ok(Self { type_key, fields })
    }
}

const FLAG_ID: u8 = 1;
const FLAG_PARENT_PREFAB: u8 = 1 << 1;
const FLAG_OWNER: u8 = 1 << 2;
const FLAG_ALWAYS_RELEVANT: u8 = 1 << 3;
const FLAG_SCOPE: u8 = 1 << 4;

/// One packed entity.
///
/// The envelope carries the attributes persisted outside the component
/// streams; the component payload is three parallel streams (component
/// ids, per-component field counts, flat field ids) plus the flat value
/// list, keeping integer and byte runs compact. `removed` lists the
/// component-type ids dropped relative to the parent prefab.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct EntityRecord {
    pub id: Option<EntityId>,
    pub parent_prefab: Option<String>,
    pub owner: Option<EntityId>,
    pub always_relevant: Option<bool>,
    pub scope: Option<Scope>,
    pub component_ids: Vec<u32>,
    pub field_counts: Vec<u8>,
    pub field_ids: Vec<u8>,
    pub field_values: Vec<FieldValue>,
    pub removed: Vec<u32>,
}

impl EntityRecord {
    /// Whether the record carries neither component data nor removals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.component_ids.is_empty() && self.removed.is_empty()
    }

    /// Encode into an owned buffer, for shipping as a network payload.
    pub fn to_bytes(&self) -> CodecResult<bytes::Bytes> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(bytes::Bytes::from(buf))
    }

    /// Check the parallel streams agree with each other.
    fn validate(&self) -> CodecResult<()> {
        if self.component_ids.len() != self.field_counts.len() {
            return Err(CodecError::Malformed("component/field-count streams disagree"));
        }
        let total: usize = self.field_counts.iter().map(|c| *c as usize).sum();
        if total != self.field_ids.len() || total != self.field_values.len() {
            return Err(CodecError::Malformed("field streams disagree"));
        }
        Ok(())
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        self.validate()?;
        let mut flags = 0u8;
        if self.id.is_some() {
            flags |= FLAG_ID;
        }
        if self.parent_prefab.is_some() {
            flags |= FLAG_PARENT_PREFAB;
        }
        if self.owner.is_some() {
            flags |= FLAG_OWNER;
        }
        if self.always_relevant.is_some() {
            flags |= FLAG_ALWAYS_RELEVANT;
        }
        if self.scope.is_some() {
            flags |= FLAG_SCOPE;
        }
        writer.write_u8(flags)?;
        if let Some(id) = self.id {
            wire::write_var_u64(writer, id.as_raw())?;
        }
        if let Some(prefab) = &self.parent_prefab {
            wire::write_string(writer, prefab)?;
        }
        if let Some(owner) = self.owner {
            wire::write_var_u64(writer, owner.as_raw())?;
        }
        if let Some(relevant) = self.always_relevant {
            wire::write_bool(writer, relevant)?;
        }
        if let Some(scope) = self.scope {
            writer.write_u8(scope.as_u8())?;
        }

        wire::write_len(writer, self.component_ids.len())?;
        for id in &self.component_ids {
            wire::write_var_u32(writer, *id)?;
        }
        writer.write_all(&self.field_counts)?;
        writer.write_all(&self.field_ids)?;
        wire::write_len(writer, self.field_values.len())?;
        for value in &self.field_values {
            write_value(writer, value)?;
        }
        wire::write_len(writer, self.removed.len())?;
        for id in &self.removed {
            wire::write_var_u32(writer, *id)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let flags = reader.read_u8()?;
        let id = (flags & FLAG_ID != 0)
            .then(|| wire::read_var_u64(reader))
            .transpose()?
            .map(EntityId::from_raw);
        let parent_prefab = (flags & FLAG_PARENT_PREFAB != 0)
            .then(|| wire::read_string(reader))
            .transpose()?;
        let owner = (flags & FLAG_OWNER != 0)
            .then(|| wire::read_var_u64(reader))
            .transpose()?
            .map(EntityId::from_raw);
        let always_relevant = (flags & FLAG_ALWAYS_RELEVANT != 0)
            .then(|| wire::read_bool(reader))
            .transpose()?;
        let scope = if flags & FLAG_SCOPE != 0 {
            let raw = reader.read_u8()?;
            Some(Scope::from_u8(raw).ok_or(CodecError::InvalidScope(raw))?)
        } else {
            None
        };

        let component_count = wire::read_len(reader)?;
        let mut component_ids = Vec::with_capacity(component_count);
        for _ in 0..component_count {
            component_ids.push(wire::read_var_u32(reader)?);
        }
        let mut field_counts = vec![0u8; component_count];
        reader.read_exact(&mut field_counts)?;
        let total: usize = field_counts.iter().map(|c| *c as usize).sum();
        let mut field_ids = vec![0u8; total];
        reader.read_exact(&mut field_ids)?;
        let value_count = wire::read_len(reader)?;
        if value_count != total {
            return Err(CodecError::Malformed("field streams disagree"));
        }
        let mut field_values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            field_values.push(read_value(reader)?);
        }
        let removed_count = wire::read_len(reader)?;
        let mut removed = Vec::with_capacity(removed_count);
        for _ in 0..removed_count {
            removed.push(wire::read_var_u32(reader)?);
        }

        let record = Self {
            id,
            parent_prefab,
            owner,
            always_relevant,
            scope,
            component_ids,
            field_counts,
            field_ids,
            field_values,
            removed,
        };
        record.validate()?;
        Ok(record)
    }
}

/// One serialized prefab template: a delta against its parent plus the
/// template metadata.
#[derive(Clone, PartialEq, Debug)]
pub struct PrefabRecord {
    pub name: String,
    pub parent: Option<String>,
    pub persisted: bool,
    pub always_relevant: bool,
    pub components: Vec<ComponentRecord>,
    pub removed: Vec<String>,
}

impl PrefabRecord {
    pub fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        wire::write_string(writer, &self.name)?;
        wire::write_opt_string(writer, self.parent.as_deref())?;
        wire::write_bool(writer, self.persisted)?;
        wire::write_bool(writer, self.always_relevant)?;
        wire::write_len(writer, self.components.len())?;
        for component in &self.components {
            component.encode(writer)?;
        }
        wire::write_len(writer, self.removed.len())?;
        for name in &self.removed {
            wire::write_string(writer, name)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let name = wire::read_string(reader)?;
        let parent = wire::read_opt_string(reader)?;
        let persisted = wire::read_bool(reader)?;
        let always_relevant = wire::read_bool(reader)?;
        let component_count = wire::read_len(reader)?;
        let mut components = Vec::with_capacity(component_count);
        for _ in 0..component_count {
            components.push(ComponentRecord::decode(reader)?);
        }
        let removed_count = wire::read_len(reader)?;
        let mut removed = Vec::with_capacity(removed_count);
        for _ in 0..removed_count {
            removed.push(wire::read_string(reader)?);
        }
        Ok(Self {
            name,
            parent,
            persisted,
            always_relevant,
            components,
            removed,
        })
    }
}

const WORLD_MAGIC: &[u8; 4] = b"TRNW";
const WORLD_VERSION: u8 = 1;

/// A whole-world snapshot: the session component-type table, every prefab,
/// every included entity, and the next-id counter.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct WorldRecord {
    pub component_types: Vec<String>,
    pub prefabs: Vec<PrefabRecord>,
    pub entities: Vec<EntityRecord>,
    pub next_id: u64,
}

impl WorldRecord {
    pub fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        writer.write_all(WORLD_MAGIC)?;
        writer.write_u8(WORLD_VERSION)?;

        wire::write_len(writer, self.component_types.len())?;
        for name in &self.component_types {
            wire::write_string(writer, name)?;
        }

        wire::write_len(writer, self.prefabs.len())?;
        for prefab in &self.prefabs {
            let mut framed = Vec::new();
            prefab.encode(&mut framed)?;
            wire::write_bytes(writer, &framed)?;
        }

        wire::write_len(writer, self.entities.len())?;
        for entity in &self.entities {
            let mut framed = Vec::new();
            entity.encode(&mut framed)?;
            wire::write_bytes(writer, &framed)?;
        }

        wire::write_var_u64(writer, self.next_id)?;
        Ok(())
    }

    /// Decode a snapshot. A prefab or entity record that fails to decode
    /// is dropped with a warning; its frame keeps the rest of the stream
    /// readable.
    pub fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != WORLD_MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = reader.read_u8()?;
        if version != WORLD_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let type_count = wire::read_len(reader)?;
        let mut component_types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            component_types.push(wire::read_string(reader)?);
        }

        let prefab_count = wire::read_len(reader)?;
        let mut prefabs = Vec::with_capacity(prefab_count);
        for index in 0..prefab_count {
            let framed = wire::read_byte_vec(reader)?;
            match PrefabRecord::decode(&mut framed.as_slice()) {
                Ok(prefab) => prefabs.push(prefab),
                Err(err) => warn!("skipping unreadable prefab record {index}: {err}"),
            }
        }

        let entity_count = wire::read_len(reader)?;
        let mut entities = Vec::with_capacity(entity_count);
        for index in 0..entity_count {
            let framed = wire::read_byte_vec(reader)?;
            match EntityRecord::decode(&mut framed.as_slice()) {
                Ok(entity) => entities.push(entity),
                Err(err) => warn!("skipping unreadable entity record {index}: {err}"),
            }
        }

        let next_id = wire::read_var_u64(reader)?;
        Ok(Self {
            component_types,
            prefabs,
            entities,
            next_id,
        })
    }
}
