//! The ghost type registry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{SchemaError, SchemaResult};
use crate::ghost::{GhostTypeDef, GhostTypeId};
use crate::hash::content_hash;
use crate::layout::{
    align_record, words_for, ComponentLayout, GhostTypeInfo, BUFFER_HEADER_BYTES,
    CHANGE_MASK_OFFSET, FIELD_BYTES,
};

/// Dense index of a registered ghost type, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GhostTypeIndex(u32);

impl GhostTypeIndex {
    /// Creates an index from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the index as a `usize`.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GhostTypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of ghost types.
///
/// Types are only ever appended; a registered type's layout never changes.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<GhostTypeInfo>,
    by_id: HashMap<GhostTypeId, GhostTypeIndex>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `def`, freezes its layout and assigns the next index.
    pub fn register(&mut self, def: GhostTypeDef) -> SchemaResult<GhostTypeIndex> {
        if self.by_id.contains_key(&def.id) {
            return Err(SchemaError::DuplicateGhostType { id: def.id });
        }
        let raw = u32::try_from(self.types.len())
            .map_err(|_| SchemaError::TooManyTypes { count: self.types.len() })?;
        let index = GhostTypeIndex(raw);
        let info = build_info(index, def)?;
        self.by_id.insert(info.id, index);
        self.types.push(info);
        Ok(index)
    }

    /// Returns the info for a registered type.
    ///
    /// # Panics
    ///
    /// Panics if `index` was not returned by [`register`](Self::register)
    /// on this registry.
    #[must_use]
    pub fn info(&self, index: GhostTypeIndex) -> &GhostTypeInfo {
        match self.types.get(index.as_usize()) {
            Some(info) => info,
            None => panic!("ghost type index {index} is not registered"),
        }
    }

    /// Returns the info for a type, or `None` if it is not registered.
    #[must_use]
    pub fn get(&self, index: GhostTypeIndex) -> Option<&GhostTypeInfo> {
        self.types.get(index.as_usize())
    }

    /// Looks up a type's index by id.
    #[must_use]
    pub fn index_of(&self, id: GhostTypeId) -> Option<GhostTypeIndex> {
        self.by_id.get(&id).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates over registered types in index order.
    pub fn iter(&self) -> impl Iterator<Item = &GhostTypeInfo> {
        self.types.iter()
    }
}

fn build_info(index: GhostTypeIndex, def: GhostTypeDef) -> SchemaResult<GhostTypeInfo> {
    if def.importance == 0 {
        return Err(SchemaError::ZeroImportance { id: def.id });
    }

    let hash = content_hash(&def);
    let mut component_ids = HashSet::new();
    let mut previous_entity = 0u16;
    let mut change_mask_bits = 0;
    let mut enable_bits = 0;
    let mut owner = None;

    for component in &def.components {
        let cid = component.component.id;
        if !component_ids.insert((component.entity_index, cid)) {
            return Err(SchemaError::DuplicateComponentId { id: cid });
        }
        if component.entity_index < previous_entity {
            return Err(SchemaError::ChildBeforeRoot { component: cid });
        }
        previous_entity = component.entity_index;
        if component.buffer && component.entity_index != 0 {
            return Err(SchemaError::BufferOnChild { component: cid });
        }

        let mut field_ids = HashSet::new();
        for field in &component.component.fields {
            if !field_ids.insert(field.id) {
                return Err(SchemaError::DuplicateFieldId {
                    component: cid,
                    field: field.id,
                });
            }
            field.codec.validate()?;
        }

        if let Some(field) = component.owner_field {
            if owner.is_some() {
                return Err(SchemaError::MultipleOwnerFields { id: def.id });
            }
            if component.entity_index != 0 || component.buffer {
                return Err(SchemaError::InvalidOwnerField {
                    component: cid,
                    field,
                });
            }
            let position = component.component.field_position(field).ok_or(
                SchemaError::InvalidOwnerField {
                    component: cid,
                    field,
                },
            )?;
            owner = Some((cid, position));
        }

        change_mask_bits += if component.buffer {
            1
        } else {
            component.component.fields.len()
        };
        if component.enableable {
            enable_bits += 1;
        }
    }

    let change_mask_words = words_for(change_mask_bits);
    let enable_words = words_for(enable_bits);
    let mut offset = CHANGE_MASK_OFFSET + (change_mask_words + enable_words) * 4;
    let mut change_bit = 0;
    let mut enable_bit = 0;
    let mut owner_offset = None;
    let mut layouts = Vec::with_capacity(def.components.len());

    for component in def.components {
        let fields = component.component.fields.len();
        let (size, change_bits, element_size) = if component.buffer {
            (BUFFER_HEADER_BYTES, 1, fields * FIELD_BYTES)
        } else {
            (fields * FIELD_BYTES, fields, 0)
        };
        if let Some((cid, position)) = owner {
            if cid == component.component.id && component.entity_index == 0 {
                owner_offset = Some(offset + position * FIELD_BYTES);
            }
        }
        let this_enable = component.enableable.then(|| {
            enable_bit += 1;
            enable_bit - 1
        });
        layouts.push(ComponentLayout {
            def: component.component,
            entity_index: component.entity_index,
            offset,
            size,
            change_bit,
            change_bits,
            enable_bit: this_enable,
            buffer: component.buffer,
            element_size,
            send_to: component.send_to,
            send_for: component.send_for,
        });
        offset += size;
        change_bit += change_bits;
    }

    let root_component_count = layouts.iter().filter(|c| c.entity_index == 0).count();
    let child_entity_count = layouts
        .iter()
        .map(|c| usize::from(c.entity_index))
        .max()
        .unwrap_or(0);

    Ok(GhostTypeInfo {
        index,
        id: def.id,
        root_component_count,
        child_component_count: layouts.len() - root_component_count,
        child_entity_count,
        change_mask_bits,
        change_mask_words,
        enable_bits,
        enable_words,
        record_size: align_record(offset),
        importance: def.importance,
        static_optimization: def.static_optimization,
        pre_serialize: def.pre_serialize,
        mode: def.mode,
        group_root: def.group_root,
        owner_offset,
        has_buffers: layouts.iter().any(|c| c.buffer),
        has_partial_send: layouts.iter().any(ComponentLayout::is_partial),
        components: layouts,
        content_hash: hash,
    })
}
