//! Type registration errors.

use std::fmt;

use crate::{ComponentId, FieldId, GhostTypeId};

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur when registering a ghost type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A type with this id is already registered.
    DuplicateGhostType { id: GhostTypeId },

    /// The same component appears twice on one entity.
    DuplicateComponentId { id: ComponentId },

    /// Duplicate field ID within a component.
    DuplicateFieldId {
        component: ComponentId,
        field: FieldId,
    },

    /// Invalid bit width for fixed-width integers (1..=32).
    InvalidBitWidth { bits: u8 },

    /// Fixed-point scale must be non-zero.
    InvalidFixedPointScale { scale: u32 },

    /// Fixed-point range is empty or does not fit in an `i32`.
    InvalidFixedPointRange { min_q: i64, max_q: i64 },

    /// Components must be ordered root first, then by child entity index.
    ChildBeforeRoot { component: ComponentId },

    /// Buffer components are only supported on the root entity.
    BufferOnChild { component: ComponentId },

    /// More than one field is marked as the owner.
    MultipleOwnerFields { id: GhostTypeId },

    /// The owner marker names a missing field or a non-root component.
    InvalidOwnerField {
        component: ComponentId,
        field: FieldId,
    },

    /// Importance must be nonzero.
    ZeroImportance { id: GhostTypeId },

    /// The registry ran out of indices.
    TooManyTypes { count: usize },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateGhostType { id } => write!(f, "ghost type {id} already registered"),
            Self::DuplicateComponentId { id } => write!(f, "duplicate component {id}"),
            Self::DuplicateFieldId { component, field } => {
                write!(f, "duplicate field {field} in component {component}")
            }
            Self::InvalidBitWidth { bits } => {
                write!(f, "invalid bit width {bits}, expected 1..=32")
            }
            Self::InvalidFixedPointScale { scale } => {
                write!(f, "invalid fixed-point scale {scale}")
            }
            Self::InvalidFixedPointRange { min_q, max_q } => {
                write!(f, "invalid fixed-point range {min_q}..={max_q}")
            }
            Self::ChildBeforeRoot { component } => {
                write!(f, "component {component} is out of entity order")
            }
            Self::BufferOnChild { component } => {
                write!(f, "buffer component {component} is on a child entity")
            }
            Self::MultipleOwnerFields { id } => {
                write!(f, "ghost type {id} has more than one owner field")
            }
            Self::InvalidOwnerField { component, field } => {
                write!(f, "owner field {field} is not a root field of component {component}")
            }
            Self::ZeroImportance { id } => write!(f, "ghost type {id} has zero importance"),
            Self::TooManyTypes { count } => write!(f, "too many ghost types: {count}"),
        }
    }
}

impl std::error::Error for SchemaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_values() {
        let err = SchemaError::InvalidBitWidth { bits: 40 };
        assert!(err.to_string().contains("40"));
        let err = SchemaError::ZeroImportance {
            id: GhostTypeId::new(0xFF),
        };
        assert!(err.to_string().contains("ff"));
    }
}
