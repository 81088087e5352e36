//! Error types for snapshot serialization.
//!
//! Running out of packet space and running out of scratch space are not
//! errors: the serializer handles both internally. Everything here is a
//! contract violation by the caller and fails the connection's tick.

use std::fmt;

use bitstream::BitError;
use schema::{ComponentId, FieldId, GhostTypeIndex};

use crate::types::{ChunkId, EntityStamp, GhostId};

/// Result type for serialization.
pub type SerializeResult<T> = Result<T, SerializeError>;

/// Fatal serialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// A chunk or group member references a type the registry does not know.
    UnknownGhostType { index: GhostTypeIndex },

    /// A chunk or ghost changed its registered type.
    GhostTypeChanged {
        chunk: ChunkId,
        expected: GhostTypeIndex,
        found: GhostTypeIndex,
    },

    /// A baseline record points outside its slot's dynamic storage.
    DynamicBaselineMissing {
        chunk: ChunkId,
        needed: usize,
        available: usize,
    },

    /// A group member is itself a group root.
    NestedGhostGroup { ghost: GhostId },

    /// An entity lacks a child entity its type declares.
    MissingChildEntity { entity: EntityStamp, child: usize },

    /// An entity's components do not match its type.
    ComponentShapeMismatch {
        entity: EntityStamp,
        component: Option<ComponentId>,
        expected: usize,
        found: usize,
    },

    /// A field value does not fit its codec.
    InvalidValue {
        component: ComponentId,
        field: FieldId,
        reason: ValueReason,
    },

    /// Growing history storage failed.
    OutOfMemory { bytes: usize },

    /// The scratch stream kept overflowing after every retry.
    ScratchExhausted { attempts: usize, capacity: usize },

    /// A bitstream error other than running out of space.
    Bits(BitError),
}

/// Why a field value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueReason {
    UnsignedOutOfRange { bits: u8, value: u64 },
    SignedOutOfRange { bits: u8, value: i64 },
    VarUIntOutOfRange { value: u64 },
    VarSIntOutOfRange { value: i64 },
    FixedPointOutOfRange { min_q: i64, max_q: i64, value: i64 },
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownGhostType { index } => write!(f, "unknown ghost type index {index}"),
            Self::GhostTypeChanged {
                chunk,
                expected,
                found,
            } => write!(
                f,
                "{chunk} changed ghost type from {expected} to {found}"
            ),
            Self::DynamicBaselineMissing {
                chunk,
                needed,
                available,
            } => write!(
                f,
                "baseline for {chunk} needs {needed} dynamic bytes, slot has {available}"
            ),
            Self::NestedGhostGroup { ghost } => {
                write!(f, "ghost {ghost} is a group root inside another group")
            }
            Self::MissingChildEntity { entity, child } => write!(
                f,
                "entity {}:{} is missing child entity {child}",
                entity.index, entity.version
            ),
            Self::ComponentShapeMismatch {
                entity,
                component,
                expected,
                found,
            } => match component {
                Some(component) => write!(
                    f,
                    "entity {}:{} component {component}: expected {expected} fields, got {found}",
                    entity.index, entity.version
                ),
                None => write!(
                    f,
                    "entity {}:{}: expected {expected} components, got {found}",
                    entity.index, entity.version
                ),
            },
            Self::InvalidValue {
                component,
                field,
                reason,
            } => write!(f, "invalid value for {component}:{field}: {reason}"),
            Self::OutOfMemory { bytes } => {
                write!(f, "failed to reserve {bytes} bytes of history storage")
            }
            Self::ScratchExhausted { attempts, capacity } => write!(
                f,
                "scratch stream still full after {attempts} attempts ({capacity} bytes)"
            ),
            Self::Bits(e) => write!(f, "bitstream error: {e}"),
        }
    }
}

impl fmt::Display for ValueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedOutOfRange { bits, value } => {
                write!(f, "unsigned value {value} does not fit in {bits} bits")
            }
            Self::SignedOutOfRange { bits, value } => {
                write!(f, "signed value {value} does not fit in {bits} bits")
            }
            Self::VarUIntOutOfRange { value } => {
                write!(f, "varuint value {value} exceeds u32")
            }
            Self::VarSIntOutOfRange { value } => {
                write!(f, "varsint value {value} exceeds i32")
            }
            Self::FixedPointOutOfRange {
                min_q,
                max_q,
                value,
            } => write!(f, "fixed-point value {value} outside [{min_q}, {max_q}]"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, got {found}")
            }
        }
    }
}

impl std::error::Error for SerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bits(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitError> for SerializeError {
    fn from(err: BitError) -> Self {
        Self::Bits(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_changed_display() {
        let err = SerializeError::GhostTypeChanged {
            chunk: ChunkId(4),
            expected: GhostTypeIndex::new(1),
            found: GhostTypeIndex::new(2),
        };
        assert_eq!(err.to_string(), "chunk#4 changed ghost type from 1 to 2");
    }

    #[test]
    fn invalid_value_display() {
        let err = SerializeError::InvalidValue {
            component: ComponentId::new(3).unwrap(),
            field: FieldId::new(2).unwrap(),
            reason: ValueReason::UnsignedOutOfRange { bits: 4, value: 99 },
        };
        let msg = err.to_string();
        assert!(msg.contains("3:2"), "got: {msg}");
        assert!(msg.contains("99"), "got: {msg}");
    }

    #[test]
    fn shape_mismatch_display_without_component() {
        let err = SerializeError::ComponentShapeMismatch {
            entity: EntityStamp::new(5, 1),
            component: None,
            expected: 2,
            found: 1,
        };
        assert_eq!(err.to_string(), "entity 5:1: expected 2 components, got 1");
    }

    #[test]
    fn bit_error_source() {
        let err: SerializeError = BitError::InvalidBitCount {
            bits: 80,
            max_bits: 64,
        }
        .into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
