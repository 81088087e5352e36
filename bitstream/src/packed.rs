//! Packed integer codes.
//!
//! A packed `u32` is a 2-bit bucket selector followed by 4, 8, 16 or 32
//! payload bits. Signed values go through the zigzag mapping first so small
//! magnitudes of either sign stay in the small buckets.

use crate::error::BitResult;
use crate::reader::BitReader;
use crate::writer::BitWriter;

/// Payload widths selected by the 2-bit bucket prefix.
pub const PACKED_BUCKETS: [usize; 4] = [4, 8, 16, 32];

const SELECTOR_BITS: usize = 2;

fn bucket_for(value: u32) -> usize {
    match value {
        0..=0xF => 0,
        0x10..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    }
}

/// Returns the encoded length of `value` in bits.
#[must_use]
pub fn packed_u32_len(value: u32) -> usize {
    SELECTOR_BITS + PACKED_BUCKETS[bucket_for(value)]
}

/// Returns the encoded length in bits of `value` as a delta against `base`.
#[must_use]
pub fn packed_u32_delta_len(value: u32, base: u32) -> usize {
    packed_u32_len(zigzag_encode(value.wrapping_sub(base) as i32))
}

/// Maps a signed value to unsigned so that small magnitudes stay small.
#[must_use]
pub const fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode`].
#[must_use]
pub const fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

impl BitWriter {
    /// Writes a packed `u32`.
    pub fn write_packed_u32(&mut self, value: u32) -> BitResult<()> {
        let bucket = bucket_for(value);
        let bits = PACKED_BUCKETS[bucket];
        // Selector and payload go out as one write so a failure leaves no
        // partial code behind.
        let code = ((bucket as u64) << bits) | u64::from(value);
        self.write_bits(code, SELECTOR_BITS + bits)
    }

    /// Writes a zigzag packed `i32`.
    pub fn write_packed_i32(&mut self, value: i32) -> BitResult<()> {
        self.write_packed_u32(zigzag_encode(value))
    }

    /// Writes `value` as a zigzag packed wrapping difference from `base`.
    pub fn write_packed_u32_delta(&mut self, value: u32, base: u32) -> BitResult<()> {
        self.write_packed_i32(value.wrapping_sub(base) as i32)
    }
}

impl BitReader<'_> {
    /// Reads a packed `u32`.
    pub fn read_packed_u32(&mut self) -> BitResult<u32> {
        let bucket = self.read_bits(SELECTOR_BITS)? as usize;
        let value = self.read_bits(PACKED_BUCKETS[bucket])?;
        Ok(value as u32)
    }

    /// Reads a zigzag packed `i32`.
    pub fn read_packed_i32(&mut self) -> BitResult<i32> {
        Ok(zigzag_decode(self.read_packed_u32()?))
    }

    /// Reads a value written by [`BitWriter::write_packed_u32_delta`].
    pub fn read_packed_u32_delta(&mut self, base: u32) -> BitResult<u32> {
        Ok(base.wrapping_add(self.read_packed_i32()? as u32))
    }
}
