//! Per-connection scratch streams.

use bitstream::BitWriter;

/// Growable scratch space owned by one connection.
///
/// Entities are serialized into the bounded main stream before the packet
/// writer knows how many fit. When the main stream fills up, the serializer
/// doubles it and re-serializes the same entities. The dynamic stream holds
/// one entity's buffer data at a time and is unbounded.
#[derive(Debug, Clone)]
pub struct ScratchStream {
    main: BitWriter,
    dynamic: BitWriter,
    capacity: usize,
}

impl ScratchStream {
    /// Creates scratch space of `bytes` bytes.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        let capacity = bytes.max(1);
        Self {
            main: BitWriter::bounded(capacity),
            dynamic: BitWriter::new(),
            capacity,
        }
    }

    /// Capacity of the main stream in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Doubles the main stream's capacity.
    pub fn grow(&mut self) {
        self.capacity = self.capacity.saturating_mul(2);
        self.main.set_capacity(self.capacity);
    }

    /// Empties both streams.
    pub fn clear(&mut self) {
        self.main.clear();
        self.dynamic.clear();
    }

    pub fn main(&self) -> &BitWriter {
        &self.main
    }

    pub(crate) fn streams_mut(&mut self) -> (&mut BitWriter, &mut BitWriter) {
        (&mut self.main, &mut self.dynamic)
    }
}
