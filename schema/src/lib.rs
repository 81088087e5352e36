//! Ghost type definitions, record layout and the type registry.
//!
//! This crate defines how ghost state is described for replication:
//! - Components, fields and field codecs
//! - Per-ghost component options (child entities, buffers, enable bits,
//!   owner-only and per-client-kind sending)
//! - The frozen snapshot record layout of each registered type
//! - Deterministic content hashing for type announcements
//!
//! # Design Principles
//!
//! - **Frozen at registration** - A type's layout never changes once registered.
//! - **Explicit definitions** - No reflection on arbitrary Rust types.
//! - **Deterministic hashing** - The content hash is stable given the same definition.

use std::fmt;
use std::num::NonZeroU16;

mod component;
mod error;
mod field;
mod ghost;
mod hash;
mod layout;
mod registry;

pub use component::{ClientKind, ClientKindMask, ComponentDef, GhostComponentDef, SendTo};
pub use error::{SchemaError, SchemaResult};
pub use field::{FieldCodec, FieldDef, FixedPoint};
pub use ghost::{GhostMode, GhostTypeDef, GhostTypeId};
pub use hash::content_hash;
pub use layout::{
    ComponentLayout, GhostTypeInfo, BUFFER_HEADER_BYTES, CHANGE_MASK_OFFSET, FIELD_BYTES,
    RECORD_ALIGN,
};
pub use registry::{GhostTypeIndex, TypeRegistry};

/// A component ID. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentId(NonZeroU16);

impl ComponentId {
    /// Creates an id, returning `None` for zero.
    #[must_use]
    pub const fn new(value: u16) -> Option<Self> {
        match NonZeroU16::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A field ID within a component. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldId(NonZeroU16);

impl FieldId {
    /// Creates an id, returning `None` for zero.
    #[must_use]
    pub const fn new(value: u16) -> Option<Self> {
        match NonZeroU16::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn public_api_exports() {
        let _ = FieldCodec::bool();
        let _ = TypeRegistry::new();
        let _ = GhostTypeDef::new(GhostTypeId::new(1));
        let _: SchemaResult<()> = Ok(());
    }

    #[test]
    fn zero_ids_are_rejected() {
        assert!(ComponentId::new(0).is_none());
        assert!(FieldId::new(0).is_none());
        assert_eq!(ComponentId::new(3).unwrap().get(), 3);
    }

    #[test]
    fn id_sizes_use_niche() {
        assert_eq!(size_of::<Option<ComponentId>>(), 2);
        assert_eq!(size_of::<Option<FieldId>>(), 2);
    }
}
