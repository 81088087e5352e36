//! Low-level bit packing primitives for the ghostsnap snapshot codec.
//!
//! This crate provides [`BitWriter`] and [`BitReader`] for bit-level encoding
//! and decoding, plus the packed integer codes every higher layer uses.
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded operations** - All reads are bounds-checked; bounded writers
//!   refuse writes past their capacity and remember that they did.
//! - **No domain knowledge** - This crate knows nothing about ghosts,
//!   chunks, or snapshots.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitReader, BitWriter};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bool(true).unwrap();
//! writer.write_bits(42, 7).unwrap();
//! writer.write_packed_u32(1_000).unwrap();
//!
//! let bytes = writer.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert!(reader.read_bool().unwrap());
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! assert_eq!(reader.read_packed_u32().unwrap(), 1_000);
//! ```

mod error;
mod packed;
mod reader;
mod writer;

pub use error::{BitError, BitResult};
pub use packed::{
    packed_u32_delta_len, packed_u32_len, zigzag_decode, zigzag_encode, PACKED_BUCKETS,
};
pub use reader::BitReader;
pub use writer::{BitMark, BitWriter};
