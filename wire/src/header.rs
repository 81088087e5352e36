//! Snapshot packet header.

use bitstream::{BitReader, BitWriter};

use crate::error::{DecodeError, EncodeResult, WireResult};

/// Protocol tag identifying a snapshot datagram.
pub const SNAPSHOT_PROTOCOL_TAG: u8 = 0x05;

/// Header size in bits: tag, local time, remote time, command age,
/// sequence, tick.
pub const HEADER_BITS: usize = 8 + 32 + 32 + 32 + 8 + 32;

/// Fixed header written at the start of every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotHeader {
    /// Server clock when the packet was written.
    pub local_time: u32,
    /// Last client timestamp seen, echoed for round-trip estimation.
    pub remote_time: u32,
    /// Age of the newest client command, in ticks.
    pub command_age: i32,
    /// Wrapping per-connection packet counter.
    pub sequence: u8,
    /// Simulation tick this snapshot represents.
    pub tick: u32,
}

impl SnapshotHeader {
    /// Writes the header, protocol tag first.
    pub fn encode(&self, writer: &mut BitWriter) -> EncodeResult<()> {
        writer.write_bits(u64::from(SNAPSHOT_PROTOCOL_TAG), 8)?;
        writer.write_bits(u64::from(self.local_time), 32)?;
        writer.write_bits(u64::from(self.remote_time), 32)?;
        writer.write_bits(u64::from(self.command_age as u32), 32)?;
        writer.write_bits(u64::from(self.sequence), 8)?;
        writer.write_bits(u64::from(self.tick), 32)?;
        Ok(())
    }

    /// Reads and validates a header.
    pub fn decode(reader: &mut BitReader<'_>) -> WireResult<Self> {
        let tag = reader.read_bits(8)? as u8;
        if tag != SNAPSHOT_PROTOCOL_TAG {
            return Err(DecodeError::InvalidProtocolTag { found: tag });
        }
        Ok(Self {
            local_time: reader.read_bits(32)? as u32,
            remote_time: reader.read_bits(32)? as u32,
            command_age: reader.read_bits(32)? as u32 as i32,
            sequence: reader.read_bits(8)? as u8,
            tick: reader.read_bits(32)? as u32,
        })
    }
}
