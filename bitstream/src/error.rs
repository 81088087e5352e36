//! Error types for bitstream operations.

use std::fmt;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Errors that can occur during bit-level encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    /// Attempted to read past the end of the buffer.
    UnexpectedEof {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Attempted to write more bits than the writer can hold.
    ///
    /// Once a bounded writer overflows it stays failed until it is rewound
    /// to a mark taken before the failure.
    BufferOverflow {
        /// Total bit length the write would have produced.
        attempted: usize,
        /// Maximum capacity in bits.
        capacity: usize,
    },

    /// Invalid bit count for the operation.
    InvalidBitCount {
        /// The invalid bit count provided.
        bits: usize,
        /// Maximum allowed bits for this operation.
        max_bits: usize,
    },

    /// Value exceeds the range representable by the specified number of bits.
    ValueOutOfRange {
        /// The value that was out of range.
        value: u64,
        /// Number of bits available.
        bits: usize,
    },

    /// A patch or copy referenced bits outside the written range.
    InvalidRange {
        /// First bit of the range.
        start: usize,
        /// Length of the range in bits.
        len: usize,
        /// Bits currently written.
        written: usize,
    },
}

impl BitError {
    /// Returns `true` if this error means the writer ran out of space.
    #[must_use]
    pub const fn is_overflow(&self) -> bool {
        matches!(self, Self::BufferOverflow { .. })
    }
}

impl fmt::Display for BitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof {
                requested,
                available,
            } => {
                write!(
                    f,
                    "attempted to read {requested} bits but only {available} bits available"
                )
            }
            Self::BufferOverflow {
                attempted,
                capacity,
            } => {
                write!(
                    f,
                    "attempted to write {attempted} bits but buffer capacity is {capacity} bits"
                )
            }
            Self::InvalidBitCount { bits, max_bits } => {
                write!(f, "invalid bit count {bits}, maximum allowed is {max_bits}")
            }
            Self::ValueOutOfRange { value, bits } => {
                write!(f, "value {value} cannot be represented in {bits} bits")
            }
            Self::InvalidRange {
                start,
                len,
                written,
            } => {
                write!(
                    f,
                    "bit range {start}+{len} is outside the {written} written bits"
                )
            }
        }
    }
}

impl std::error::Error for BitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unexpected_eof() {
        let err = BitError::UnexpectedEof {
            requested: 8,
            available: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("8 bits"), "should mention requested bits");
        assert!(msg.contains("3 bits"), "should mention available bits");
        assert!(msg.contains("read"), "should mention read operation");
    }

    #[test]
    fn error_display_buffer_overflow() {
        let err = BitError::BufferOverflow {
            attempted: 100,
            capacity: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"), "should mention attempted bits");
        assert!(msg.contains("64"), "should mention capacity");
        assert!(msg.contains("write"), "should mention write operation");
    }

    #[test]
    fn error_display_invalid_range() {
        let err = BitError::InvalidRange {
            start: 10,
            len: 32,
            written: 16,
        };
        let msg = err.to_string();
        assert!(msg.contains("10+32"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn overflow_classification() {
        assert!(BitError::BufferOverflow {
            attempted: 9,
            capacity: 8
        }
        .is_overflow());
        assert!(!BitError::InvalidBitCount {
            bits: 65,
            max_bits: 64
        }
        .is_overflow());
    }

    #[test]
    fn error_is_std_error() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<BitError>();
    }
}
