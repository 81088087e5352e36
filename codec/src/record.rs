//! Snapshot record images.
//!
//! An image is the record an entity would have if it were written this
//! tick: field words, enable words and buffer elements, with the tick and
//! change-mask words left zero. Images depend only on the world, so types
//! marked for pre-serialization build them once per tick and every
//! connection reads the same copy.

use std::collections::HashMap;

use schema::{ComponentLayout, FieldCodec, FieldDef, GhostTypeInfo};

use crate::error::{SerializeError, SerializeResult, ValueReason};
use crate::types::{ChunkId, EntityStamp};
use crate::world::{ComponentState, ComponentValue, FieldValue, GhostChunk, GhostEntity};

/// Reads a little-endian word at a byte offset.
#[must_use]
pub fn read_word(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Writes a little-endian word at a byte offset.
pub fn write_word(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads bit `bit` of the word array starting at `offset`.
#[must_use]
pub fn read_bit(bytes: &[u8], offset: usize, bit: usize) -> bool {
    read_word(bytes, offset + (bit / 32) * 4) & (1 << (bit % 32)) != 0
}

/// Sets or clears bit `bit` of the word array starting at `offset`.
pub fn write_bit(bytes: &mut [u8], offset: usize, bit: usize, value: bool) {
    let at = offset + (bit / 32) * 4;
    let word = read_word(bytes, at);
    let mask = 1 << (bit % 32);
    write_word(bytes, at, if value { word | mask } else { word & !mask });
}

/// Leading tick of a record.
#[must_use]
pub fn record_tick(record: &[u8]) -> u32 {
    read_word(record, 0)
}

/// Converts a field value into its stored word.
pub fn encode_field(
    component: &ComponentLayout,
    field: &FieldDef,
    value: FieldValue,
) -> SerializeResult<u32> {
    let invalid = |reason| SerializeError::InvalidValue {
        component: component.def.id,
        field: field.id,
        reason,
    };
    match (field.codec, value) {
        (FieldCodec::Bool, FieldValue::Bool(v)) => Ok(u32::from(v)),
        (FieldCodec::UInt { bits }, FieldValue::UInt(v)) => {
            if (bits < 32 && v >= (1u64 << bits)) || v > u64::from(u32::MAX) {
                return Err(invalid(ValueReason::UnsignedOutOfRange { bits, value: v }));
            }
            Ok(v as u32)
        }
        (FieldCodec::SInt { bits }, FieldValue::SInt(v)) => {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if v < min || v > max {
                return Err(invalid(ValueReason::SignedOutOfRange { bits, value: v }));
            }
            Ok(v as i32 as u32)
        }
        (FieldCodec::VarUInt, FieldValue::VarUInt(v)) => {
            u32::try_from(v).map_err(|_| invalid(ValueReason::VarUIntOutOfRange { value: v }))
        }
        (FieldCodec::VarSInt, FieldValue::VarSInt(v)) => i32::try_from(v)
            .map(|v| v as u32)
            .map_err(|_| invalid(ValueReason::VarSIntOutOfRange { value: v })),
        (FieldCodec::FixedPoint(fp), FieldValue::FixedPoint(q)) => {
            if q < fp.min_q || q > fp.max_q {
                return Err(invalid(ValueReason::FixedPointOutOfRange {
                    min_q: fp.min_q,
                    max_q: fp.max_q,
                    value: q,
                }));
            }
            Ok(q as i32 as u32)
        }
        (codec, value) => Err(invalid(ValueReason::TypeMismatch {
            expected: codec.name(),
            found: value.kind(),
        })),
    }
}

/// Converts a stored word back into a field value.
#[must_use]
pub fn decode_field(codec: FieldCodec, word: u32) -> FieldValue {
    match codec {
        FieldCodec::Bool => FieldValue::Bool(word != 0),
        FieldCodec::UInt { .. } => FieldValue::UInt(u64::from(word)),
        FieldCodec::SInt { .. } => FieldValue::SInt(i64::from(word as i32)),
        FieldCodec::VarUInt => FieldValue::VarUInt(u64::from(word)),
        FieldCodec::VarSInt => FieldValue::VarSInt(i64::from(word as i32)),
        FieldCodec::FixedPoint(_) => FieldValue::FixedPoint(i64::from(word as i32)),
    }
}

/// The would-be record of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityImage {
    /// `record_size` bytes. Buffer headers hold the element count and a
    /// zero offset.
    pub record: Vec<u8>,
    /// Flattened element words, one list per buffer component.
    pub buffers: Vec<Vec<u32>>,
}

impl EntityImage {
    /// Builds the image of `entity` under `info`'s layout.
    pub fn build(info: &GhostTypeInfo, entity: &GhostEntity) -> SerializeResult<Self> {
        let mut record = vec![0u8; info.record_size];
        let mut buffers = Vec::new();
        let enable_offset = info.enable_offset();

        let mut current_entity = u16::MAX;
        let mut states: &[ComponentState] = &[];
        let mut position = 0;

        for layout in &info.components {
            if layout.entity_index != current_entity {
                current_entity = layout.entity_index;
                position = 0;
                states = component_states(entity, usize::from(current_entity))?;
                let expected = info
                    .components
                    .iter()
                    .filter(|c| c.entity_index == current_entity)
                    .count();
                if states.len() != expected {
                    return Err(SerializeError::ComponentShapeMismatch {
                        entity: entity.stamp,
                        component: None,
                        expected,
                        found: states.len(),
                    });
                }
            }
            let state = &states[position];
            position += 1;

            if let Some(bit) = layout.enable_bit {
                write_bit(&mut record, enable_offset, bit, state.enabled);
            }

            match (&state.value, layout.buffer) {
                (ComponentValue::Fields(values), false) => {
                    check_len(entity.stamp, layout, values.len())?;
                    for (i, (field, value)) in layout.def.fields.iter().zip(values).enumerate() {
                        let word = encode_field(layout, field, *value)?;
                        write_word(&mut record, layout.offset + i * 4, word);
                    }
                }
                (ComponentValue::Buffer(elements), true) => {
                    let mut words = Vec::with_capacity(elements.len() * layout.field_count());
                    for element in elements {
                        check_len(entity.stamp, layout, element.len())?;
                        for (field, value) in layout.def.fields.iter().zip(element) {
                            words.push(encode_field(layout, field, *value)?);
                        }
                    }
                    write_word(&mut record, layout.offset, elements.len() as u32);
                    buffers.push(words);
                }
                (_, buffer) => {
                    return Err(SerializeError::ComponentShapeMismatch {
                        entity: entity.stamp,
                        component: Some(layout.def.id),
                        expected: usize::from(buffer),
                        found: usize::from(!buffer),
                    });
                }
            }
        }

        Ok(Self { record, buffers })
    }

    /// The owner network id stored in the record.
    #[must_use]
    pub fn owner(&self, info: &GhostTypeInfo) -> Option<i32> {
        info.owner_offset
            .map(|offset| read_word(&self.record, offset) as i32)
    }
}

fn component_states(
    entity: &GhostEntity,
    entity_index: usize,
) -> SerializeResult<&[ComponentState]> {
    if entity_index == 0 {
        return Ok(&entity.components);
    }
    entity
        .children
        .get(entity_index - 1)
        .map(|child| child.components.as_slice())
        .ok_or(SerializeError::MissingChildEntity {
            entity: entity.stamp,
            child: entity_index,
        })
}

fn check_len(entity: EntityStamp, layout: &ComponentLayout, found: usize) -> SerializeResult<()> {
    if found != layout.field_count() {
        return Err(SerializeError::ComponentShapeMismatch {
            entity,
            component: Some(layout.def.id),
            expected: layout.field_count(),
            found,
        });
    }
    Ok(())
}

/// Images built once per tick, shared by every connection.
#[derive(Debug, Clone, Default)]
pub struct PreSerialized {
    chunks: HashMap<ChunkId, Vec<EntityImage>>,
}

impl PreSerialized {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds images for every entity of a chunk.
    pub fn build_chunk(
        info: &GhostTypeInfo,
        chunk: &GhostChunk,
    ) -> SerializeResult<Vec<EntityImage>> {
        chunk
            .entities
            .iter()
            .map(|entity| EntityImage::build(info, entity))
            .collect()
    }

    /// Stores the images of a chunk.
    pub fn insert(&mut self, chunk: ChunkId, images: Vec<EntityImage>) {
        self.chunks.insert(chunk, images);
    }

    /// Returns a stored image.
    #[must_use]
    pub fn get(&self, chunk: ChunkId, entity: usize) -> Option<&EntityImage> {
        self.chunks.get(&chunk)?.get(entity)
    }

    /// Number of chunks with stored images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drops every image.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
