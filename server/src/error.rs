//! Error types for the send loop.

use std::fmt;

use codec::{NetworkId, SerializeError};
use wire::{EncodeError, TransportError};

/// Result type for send loop operations.
pub type SendResult<T> = Result<T, SendError>;

/// Errors raised while building or sending one connection's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport refused to open or commit the packet.
    Transport(TransportError),

    /// The packet prelude or despawn list could not be written.
    Encode(EncodeError),

    /// The serializer hit an unrecoverable problem.
    Serialize(SerializeError),

    /// No connection with this id is registered.
    UnknownConnection(NetworkId),

    /// A connection with this id is already registered.
    DuplicateConnection(NetworkId),
}

impl SendError {
    /// Returns `true` if a larger packet attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Encode(err) => err.is_packet_full(),
            Self::Serialize(SerializeError::Bits(err)) => err.is_overflow(),
            _ => false,
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Encode(err) => write!(f, "encode error: {err}"),
            Self::Serialize(err) => write!(f, "serialize error: {err}"),
            Self::UnknownConnection(id) => write!(f, "unknown connection {}", id.0),
            Self::DuplicateConnection(id) => write!(f, "connection {} already registered", id.0),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::UnknownConnection(_) | Self::DuplicateConnection(_) => None,
        }
    }
}

impl From<TransportError> for SendError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<EncodeError> for SendError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<SerializeError> for SendError {
    fn from(err: SerializeError) -> Self {
        Self::Serialize(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::BitWriter;

    #[test]
    fn packet_full_is_retryable() {
        let mut writer = BitWriter::bounded(0);
        let err = writer.write_bool(true).unwrap_err();
        assert!(SendError::Encode(EncodeError::Bits(err)).is_retryable());
        assert!(SendError::Transport(TransportError::Busy).is_retryable());
        assert!(!SendError::Encode(EncodeError::LengthOverflow { length: 1 }).is_retryable());
    }

    #[test]
    fn error_display_names_the_layer() {
        let err = SendError::UnknownConnection(NetworkId(4));
        assert_eq!(err.to_string(), "unknown connection 4");
        let err = SendError::from(TransportError::Closed);
        assert!(err.to_string().starts_with("transport error"));
    }
}
