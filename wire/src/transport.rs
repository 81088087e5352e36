//! Transport contract consumed by the snapshot sender.
//!
//! The sender never touches sockets. It asks a [`SnapshotTransport`] for a
//! bounded [`SendBuffer`], writes the snapshot into it, then either commits
//! it with `end_send` or hands it back with `abort_send`.

use std::fmt;

use bitstream::BitWriter;

/// Delivery channel for a snapshot datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Single unreliable datagram, bounded by the MTU.
    Unreliable,
    /// Unreliable but fragmented, for snapshots larger than one datagram.
    Fragmented,
}

/// Picks the single-datagram channel when `size` fits its payload limit.
#[must_use]
pub const fn select_channel(size: usize, unreliable_payload_limit: usize) -> ChannelKind {
    if size <= unreliable_payload_limit {
        ChannelKind::Unreliable
    } else {
        ChannelKind::Fragmented
    }
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection is gone.
    Closed,
    /// The channel cannot carry a packet this large.
    TooLarge { requested: usize, limit: usize },
    /// The transport has no send buffer available right now.
    Busy,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::TooLarge { requested, limit } => {
                write!(f, "packet of {requested} bytes exceeds channel limit {limit}")
            }
            Self::Busy => write!(f, "no send buffer available"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A bounded outgoing packet handed out by [`SnapshotTransport::begin_send`].
#[derive(Debug)]
pub struct SendBuffer {
    channel: ChannelKind,
    writer: BitWriter,
}

impl SendBuffer {
    /// Creates a buffer that accepts at most `capacity` bytes.
    #[must_use]
    pub fn new(channel: ChannelKind, capacity: usize) -> Self {
        Self {
            channel,
            writer: BitWriter::bounded(capacity),
        }
    }

    /// The channel this buffer will be sent on.
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.writer.capacity_bits() / 8
    }

    /// The packet writer.
    pub fn writer(&mut self) -> &mut BitWriter {
        &mut self.writer
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.writer.bytes_written()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.writer.bits_written() == 0
    }

    /// Consumes the buffer, returning the packet bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.finish()
    }
}

/// Outgoing side of a connection's transport.
pub trait SnapshotTransport {
    /// Largest payload the channel carries, in bytes.
    fn payload_limit(&self, channel: ChannelKind) -> usize;

    /// Opens a packet of roughly `size_hint` bytes.
    fn begin_send(
        &mut self,
        channel: ChannelKind,
        size_hint: usize,
    ) -> Result<SendBuffer, TransportError>;

    /// Commits the packet, returning the bytes sent.
    fn end_send(&mut self, buffer: SendBuffer) -> Result<usize, TransportError>;

    /// Drops a packet without sending it.
    fn abort_send(&mut self, buffer: SendBuffer);
}

/// In-memory transport that records every committed packet.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    unreliable_limit: usize,
    fragmented_limit: usize,
    sent: Vec<(ChannelKind, Vec<u8>)>,
    aborted: usize,
    fail_begins: usize,
}

impl LoopbackTransport {
    /// Creates a loopback with the given channel payload limits.
    #[must_use]
    pub const fn new(unreliable_limit: usize, fragmented_limit: usize) -> Self {
        Self {
            unreliable_limit,
            fragmented_limit,
            sent: Vec::new(),
            aborted: 0,
            fail_begins: 0,
        }
    }

    /// Makes the next `count` calls to `begin_send` fail with `Busy`.
    pub fn fail_next_begins(&mut self, count: usize) {
        self.fail_begins = count;
    }

    /// Packets committed so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> &[(ChannelKind, Vec<u8>)] {
        &self.sent
    }

    /// Removes and returns the committed packets.
    pub fn drain(&mut self) -> Vec<(ChannelKind, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }

    /// Number of aborted packets.
    #[must_use]
    pub const fn aborted(&self) -> usize {
        self.aborted
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(1200, 64 * 1024)
    }
}

impl SnapshotTransport for LoopbackTransport {
    fn payload_limit(&self, channel: ChannelKind) -> usize {
        match channel {
            ChannelKind::Unreliable => self.unreliable_limit,
            ChannelKind::Fragmented => self.fragmented_limit,
        }
    }

    fn begin_send(
        &mut self,
        channel: ChannelKind,
        size_hint: usize,
    ) -> Result<SendBuffer, TransportError> {
        if self.fail_begins > 0 {
            self.fail_begins -= 1;
            return Err(TransportError::Busy);
        }
        let limit = self.payload_limit(channel);
        if size_hint > limit {
            return Err(TransportError::TooLarge {
                requested: size_hint,
                limit,
            });
        }
        Ok(SendBuffer::new(channel, size_hint))
    }

    fn end_send(&mut self, buffer: SendBuffer) -> Result<usize, TransportError> {
        let channel = buffer.channel();
        let bytes = buffer.into_bytes();
        let len = bytes.len();
        self.sent.push((channel, bytes));
        Ok(len)
    }

    fn abort_send(&mut self, _buffer: SendBuffer) {
        self.aborted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_selection_by_payload_limit() {
        assert_eq!(select_channel(1200, 1200), ChannelKind::Unreliable);
        assert_eq!(select_channel(1201, 1200), ChannelKind::Fragmented);
    }

    #[test]
    fn send_buffer_is_bounded() {
        let mut buffer = SendBuffer::new(ChannelKind::Unreliable, 2);
        buffer.writer().write_bits(0xFFFF, 16).unwrap();
        assert!(buffer.writer().write_bool(true).is_err());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn loopback_records_and_aborts() {
        let mut transport = LoopbackTransport::new(16, 64);
        let mut buffer = transport.begin_send(ChannelKind::Unreliable, 8).unwrap();
        buffer.writer().write_bits(0xAB, 8).unwrap();
        assert_eq!(transport.end_send(buffer).unwrap(), 1);

        let buffer = transport.begin_send(ChannelKind::Fragmented, 32).unwrap();
        transport.abort_send(buffer);

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].1, vec![0xAB]);
        assert_eq!(transport.aborted(), 1);
    }

    #[test]
    fn loopback_rejects_oversized_and_busy() {
        let mut transport = LoopbackTransport::new(16, 64);
        assert_eq!(
            transport.begin_send(ChannelKind::Unreliable, 17).unwrap_err(),
            TransportError::TooLarge {
                requested: 17,
                limit: 16
            }
        );
        transport.fail_next_begins(1);
        assert_eq!(
            transport.begin_send(ChannelKind::Unreliable, 8).unwrap_err(),
            TransportError::Busy
        );
        assert!(transport.begin_send(ChannelKind::Unreliable, 8).is_ok());
    }
}
