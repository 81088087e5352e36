//! Snapshot record layout computed at registration.
//!
//! ```text
//! offset 0                 tick (u32)
//! offset 4                 change-mask words (u32 each)
//!                          enable-bit words (u32 each)
//!                          component storage, registry order
//! record_size              rounded up to 16 bytes
//! ```
//!
//! A plain component takes one `u32` per field and one change bit per
//! field. A buffer component takes `(length, offset)` into the history
//! slot's dynamic storage and a single change bit.

use crate::component::{ClientKindMask, ComponentDef, SendTo};
use crate::ghost::{GhostMode, GhostTypeId};
use crate::registry::GhostTypeIndex;

/// Bytes per stored field.
pub const FIELD_BYTES: usize = 4;

/// Bytes a buffer component occupies in the fixed record.
pub const BUFFER_HEADER_BYTES: usize = 8;

/// Record alignment.
pub const RECORD_ALIGN: usize = 16;

/// Byte offset of the change-mask words.
pub const CHANGE_MASK_OFFSET: usize = 4;

/// Frozen layout of one component within a ghost type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentLayout {
    pub def: ComponentDef,
    pub entity_index: u16,
    /// Byte offset within the record.
    pub offset: usize,
    /// Bytes within the record.
    pub size: usize,
    /// First change-mask bit.
    pub change_bit: usize,
    /// Number of change-mask bits.
    pub change_bits: usize,
    /// Enable bit, for enableable components.
    pub enable_bit: Option<usize>,
    pub buffer: bool,
    /// Bytes per buffer element in dynamic storage.
    pub element_size: usize,
    pub send_to: SendTo,
    pub send_for: ClientKindMask,
}

impl ComponentLayout {
    /// Number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.def.fields.len()
    }

    /// Returns `true` if some connections never receive this component.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.send_to != SendTo::All || self.send_for != ClientKindMask::ALL
    }
}

/// Immutable per-type facts shared by every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostTypeInfo {
    pub index: GhostTypeIndex,
    pub id: GhostTypeId,
    pub components: Vec<ComponentLayout>,
    pub root_component_count: usize,
    pub child_component_count: usize,
    /// Highest child entity index referenced.
    pub child_entity_count: usize,
    pub change_mask_bits: usize,
    pub change_mask_words: usize,
    pub enable_bits: usize,
    pub enable_words: usize,
    pub record_size: usize,
    pub importance: u32,
    pub static_optimization: bool,
    pub pre_serialize: bool,
    pub mode: GhostMode,
    pub group_root: bool,
    /// Byte offset of the owner network id field.
    pub owner_offset: Option<usize>,
    pub has_buffers: bool,
    pub has_partial_send: bool,
    pub content_hash: u64,
}

impl GhostTypeInfo {
    /// Byte offset of the enable-bit words.
    #[must_use]
    pub const fn enable_offset(&self) -> usize {
        CHANGE_MASK_OFFSET + self.change_mask_words * 4
    }

    /// Byte offset of the first component.
    #[must_use]
    pub const fn data_offset(&self) -> usize {
        self.enable_offset() + self.enable_words * 4
    }
}

pub(crate) const fn words_for(bits: usize) -> usize {
    bits.div_ceil(32)
}

pub(crate) const fn align_record(size: usize) -> usize {
    size.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counts() {
        assert_eq!(words_for(0), 0);
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(32), 1);
        assert_eq!(words_for(33), 2);
    }

    #[test]
    fn record_alignment() {
        assert_eq!(align_record(4), 16);
        assert_eq!(align_record(16), 16);
        assert_eq!(align_record(17), 32);
    }
}
