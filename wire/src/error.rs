//! Error types for wire format operations.

use std::fmt;

use bitstream::BitError;

/// Result type for wire decoding.
pub type WireResult<T> = Result<T, DecodeError>;

/// Result type for wire encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Decode errors for snapshot packets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The bit reader ran out of data or hit an invalid width.
    Bits(BitError),

    /// The leading protocol tag is not a snapshot tag.
    InvalidProtocolTag { found: u8 },

    /// A counted list exceeded its limit.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// A back-patched section length disagrees with the section contents.
    SectionLengthMismatch {
        section: Section,
        declared: usize,
        actual: usize,
    },
}

/// Specific wire limits that can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    PacketBytes,
    NewTypes,
    Despawns,
}

/// Length-prefixed packet sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Despawns,
    Updates,
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The underlying writer rejected the write.
    Bits(BitError),

    /// A counted list exceeded its limit.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// A section length does not fit its 32-bit placeholder.
    LengthOverflow { length: usize },
}

impl EncodeError {
    /// Returns `true` if the packet ran out of space.
    #[must_use]
    pub const fn is_packet_full(&self) -> bool {
        matches!(self, Self::Bits(err) if err.is_overflow())
    }
}

impl From<BitError> for DecodeError {
    fn from(err: BitError) -> Self {
        Self::Bits(err)
    }
}

impl From<BitError> for EncodeError {
    fn from(err: BitError) -> Self {
        Self::Bits(err)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits(err) => write!(f, "bitstream error: {err}"),
            Self::InvalidProtocolTag { found } => {
                write!(f, "invalid protocol tag: 0x{found:02X}")
            }
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
            Self::SectionLengthMismatch {
                section,
                declared,
                actual,
            } => {
                write!(
                    f,
                    "{section} section length mismatch: header {declared} bytes but {actual} found"
                )
            }
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PacketBytes => "packet bytes",
            Self::NewTypes => "new type",
            Self::Despawns => "despawn",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Despawns => "despawn",
            Self::Updates => "update",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits(err) => write!(f, "bitstream error: {err}"),
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
            Self::LengthOverflow { length } => {
                write!(f, "length overflow: {length}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bits(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bits(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display_invalid_tag() {
        let err = DecodeError::InvalidProtocolTag { found: 0xAB };
        assert!(err.to_string().contains("AB"));
    }

    #[test]
    fn decode_error_display_limits_exceeded() {
        let err = DecodeError::LimitsExceeded {
            kind: LimitKind::Despawns,
            limit: 100,
            actual: 101,
        };
        let msg = err.to_string();
        assert!(msg.contains("despawn"));
        assert!(msg.contains("101"));
    }

    #[test]
    fn section_mismatch_display() {
        let err = DecodeError::SectionLengthMismatch {
            section: Section::Updates,
            declared: 10,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("update"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn packet_full_classification() {
        let full = EncodeError::Bits(BitError::BufferOverflow {
            attempted: 9,
            capacity: 8,
        });
        assert!(full.is_packet_full());
        assert!(!EncodeError::LengthOverflow { length: 1 }.is_packet_full());
    }
}
