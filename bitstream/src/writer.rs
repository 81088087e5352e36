//! Bit-level writer for encoding packed binary data.

use std::ops::Range;

use crate::error::{BitError, BitResult};

/// A position inside a [`BitWriter`] that can be rewound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMark {
    bits: usize,
    failed: bool,
}

impl BitMark {
    /// Bit offset of the mark.
    #[must_use]
    pub const fn bits(self) -> usize {
        self.bits
    }
}

/// A bit-level writer for encoding packed binary data.
///
/// Bits are written most-significant first. A writer is either unbounded or
/// bounded to a byte capacity; a bounded writer that runs out of space sets
/// a sticky failed flag and rejects every following write until it is
/// rewound with [`rewind`](Self::rewind).
#[derive(Debug, Clone)]
pub struct BitWriter {
    /// The accumulated bytes. The last byte may be partially filled.
    bytes: Vec<u8>,
    /// Number of bits written.
    bit_len: usize,
    /// Maximum number of bits this writer accepts.
    capacity_bits: usize,
    /// Set once a write did not fit.
    failed: bool,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    /// Creates a new unbounded `BitWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_len: 0,
            capacity_bits: usize::MAX,
            failed: false,
        }
    }

    /// Creates a writer that accepts at most `bytes` bytes.
    #[must_use]
    pub fn bounded(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            bit_len: 0,
            capacity_bits: bytes.saturating_mul(8),
            failed: false,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.bit_len
    }

    /// Returns the number of whole or partial bytes written so far.
    #[must_use]
    pub const fn bytes_written(&self) -> usize {
        self.bit_len.div_ceil(8)
    }

    /// Returns the capacity in bits (`usize::MAX` when unbounded).
    #[must_use]
    pub const fn capacity_bits(&self) -> usize {
        self.capacity_bits
    }

    /// Returns the number of bits that can still be written.
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        if self.failed {
            return 0;
        }
        self.capacity_bits.saturating_sub(self.bit_len)
    }

    /// Returns `true` if a write has failed since the last rewind.
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    /// Changes the capacity, keeping everything written so far.
    ///
    /// Shrinking below the written length marks the writer as failed.
    pub fn set_capacity(&mut self, bytes: usize) {
        self.capacity_bits = bytes.saturating_mul(8);
        if self.bit_len > self.capacity_bits {
            self.failed = true;
        }
    }

    /// Discards all written bits and clears the failed flag.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bit_len = 0;
        self.failed = false;
    }

    /// Returns the current position for a later [`rewind`](Self::rewind).
    #[must_use]
    pub const fn mark(&self) -> BitMark {
        BitMark {
            bits: self.bit_len,
            failed: self.failed,
        }
    }

    /// Truncates the stream back to `mark`, restoring its failed state.
    pub fn rewind(&mut self, mark: BitMark) {
        if mark.bits >= self.bit_len {
            self.failed = mark.failed;
            return;
        }
        self.bit_len = mark.bits;
        self.bytes.truncate(self.bit_len.div_ceil(8));
        let used = self.bit_len % 8;
        if used != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFF << (8 - used);
            }
        }
        self.failed = mark.failed;
    }

    fn reserve_bits(&mut self, bits: usize) -> BitResult<()> {
        let attempted = self.bit_len.saturating_add(bits);
        if self.failed || attempted > self.capacity_bits {
            self.failed = true;
            return Err(BitError::BufferOverflow {
                attempted,
                capacity: self.capacity_bits,
            });
        }
        let needed = attempted.div_ceil(8);
        if self.bytes.len() < needed {
            self.bytes.resize(needed, 0);
        }
        Ok(())
    }

    fn put_bit(&mut self, value: bool) {
        if value {
            self.bytes[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Writes a single bit.
    pub fn write_bool(&mut self, value: bool) -> BitResult<()> {
        self.reserve_bits(1)?;
        self.put_bit(value);
        Ok(())
    }

    /// Writes up to 64 bits from an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    /// Returns [`BitError::BufferOverflow`] if the writer is full.
    pub fn write_bits(&mut self, value: u64, bits: usize) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits < 64 && value >= (1u64 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }
        self.reserve_bits(bits)?;
        for i in (0..bits).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) -> BitResult<()> {
        let rem = self.bit_len % 8;
        if rem == 0 {
            return Ok(());
        }
        self.write_bits(0, 8 - rem)
    }

    /// Overwrites `bits` bits starting at bit offset `at` with `value`.
    ///
    /// The range must already have been written. Used to back-patch length
    /// placeholders.
    pub fn patch_bits(&mut self, at: usize, value: u64, bits: usize) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits < 64 && value >= (1u64 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }
        if at.saturating_add(bits) > self.bit_len {
            return Err(BitError::InvalidRange {
                start: at,
                len: bits,
                written: self.bit_len,
            });
        }
        for i in 0..bits {
            let pos = at + i;
            let mask = 0x80u8 >> (pos % 8);
            if (value >> (bits - 1 - i)) & 1 == 1 {
                self.bytes[pos / 8] |= mask;
            } else {
                self.bytes[pos / 8] &= !mask;
            }
        }
        Ok(())
    }

    /// Appends the bits in `range` of `source`.
    pub fn append_bits(&mut self, source: &Self, range: Range<usize>) -> BitResult<()> {
        if range.end > source.bit_len || range.start > range.end {
            return Err(BitError::InvalidRange {
                start: range.start,
                len: range.end.saturating_sub(range.start),
                written: source.bit_len,
            });
        }
        self.reserve_bits(range.len())?;
        let mut pos = range.start;
        // Copy whole bytes when both sides are byte aligned.
        if pos % 8 == 0 && self.bit_len % 8 == 0 {
            let whole = (range.end - pos) / 8;
            let dst = self.bit_len / 8;
            self.bytes[dst..dst + whole].copy_from_slice(&source.bytes[pos / 8..pos / 8 + whole]);
            self.bit_len += whole * 8;
            pos += whole * 8;
        }
        while pos < range.end {
            let bit = (source.bytes[pos / 8] >> (7 - pos % 8)) & 1 == 1;
            self.put_bit(bit);
            pos += 1;
        }
        Ok(())
    }

    /// Returns the bytes written so far, with the last byte zero padded.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.bytes_written()]
    }

    /// Finishes writing and returns the byte buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.truncate(self.bytes_written());
        self.bytes
    }
}
