//! Snapshot prelude, length placeholders and the despawn list.
//!
//! Layout after the [`SnapshotHeader`]:
//!
//! ```text
//! new type count         8 bits
//! per new type           64 + 64 bits id, 64 bits content hash
//! relevant ghost count   packed u32
//! prespawn flag          1 bit
//! despawn length         32 bits, back-patched (bytes)
//! update length          32 bits, back-patched (bytes)
//! despawn list           byte aligned: packed count, packed zigzag ids
//! updates                byte aligned, opaque to this crate
//! ```

use bitstream::{BitReader, BitWriter};

use crate::error::{DecodeError, EncodeError, EncodeResult, LimitKind, Section, WireResult};
use crate::header::SnapshotHeader;
use crate::limits::Limits;

/// A ghost type announced to a connection for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeAnnouncement {
    /// Stable 128-bit type identifier.
    pub id: u128,
    /// Hash of the type's serialization layout.
    pub content_hash: u64,
}

/// Everything written before the length placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotPrelude {
    pub header: SnapshotHeader,
    pub new_types: Vec<TypeAnnouncement>,
    /// Ghosts the client should hold after applying this snapshot.
    pub relevant_ghost_count: u32,
    /// Set when prespawned ghosts use the negative-id encoding.
    pub prespawn: bool,
}

/// Bit offsets of the two section length fields, for back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPlaceholders {
    despawn_len_at: usize,
    update_len_at: usize,
}

impl LengthPlaceholders {
    /// Patches the despawn section length.
    pub fn patch_despawn_len(&self, writer: &mut BitWriter, bytes: usize) -> EncodeResult<()> {
        patch_len(writer, self.despawn_len_at, bytes)
    }

    /// Patches the update section length.
    pub fn patch_update_len(&self, writer: &mut BitWriter, bytes: usize) -> EncodeResult<()> {
        patch_len(writer, self.update_len_at, bytes)
    }
}

fn patch_len(writer: &mut BitWriter, at: usize, bytes: usize) -> EncodeResult<()> {
    let value = u32::try_from(bytes).map_err(|_| EncodeError::LengthOverflow { length: bytes })?;
    writer.patch_bits(at, u64::from(value), 32)?;
    Ok(())
}

fn check_limit(kind: LimitKind, limit: usize, actual: usize) -> EncodeResult<()> {
    if actual > limit {
        return Err(EncodeError::LimitsExceeded {
            kind,
            limit,
            actual,
        });
    }
    Ok(())
}

/// Writes the header, type announcements, ghost count, prespawn flag and
/// zeroed length placeholders, then aligns to a byte boundary.
pub fn write_prelude(
    writer: &mut BitWriter,
    prelude: &SnapshotPrelude,
    limits: &Limits,
) -> EncodeResult<LengthPlaceholders> {
    let type_limit = limits.max_new_types_per_snapshot.min(usize::from(u8::MAX));
    check_limit(LimitKind::NewTypes, type_limit, prelude.new_types.len())?;

    prelude.header.encode(writer)?;
    writer.write_bits(prelude.new_types.len() as u64, 8)?;
    for announcement in &prelude.new_types {
        writer.write_bits((announcement.id >> 64) as u64, 64)?;
        writer.write_bits(announcement.id as u64, 64)?;
        writer.write_bits(announcement.content_hash, 64)?;
    }
    writer.write_packed_u32(prelude.relevant_ghost_count)?;
    writer.write_bool(prelude.prespawn)?;

    let despawn_len_at = writer.bits_written();
    writer.write_bits(0, 32)?;
    let update_len_at = writer.bits_written();
    writer.write_bits(0, 32)?;
    writer.align_to_byte()?;

    Ok(LengthPlaceholders {
        despawn_len_at,
        update_len_at,
    })
}

/// Writes the despawn list: packed count then zigzag packed ids.
///
/// The writer must be byte aligned. The list is padded to the next byte.
pub fn write_despawn_list(
    writer: &mut BitWriter,
    ghost_ids: &[i32],
    limits: &Limits,
) -> EncodeResult<()> {
    check_limit(
        LimitKind::Despawns,
        limits.max_despawns_per_snapshot,
        ghost_ids.len(),
    )?;
    let count = u32::try_from(ghost_ids.len()).map_err(|_| EncodeError::LengthOverflow {
        length: ghost_ids.len(),
    })?;
    writer.write_packed_u32(count)?;
    for &id in ghost_ids {
        writer.write_packed_i32(id)?;
    }
    writer.align_to_byte()?;
    Ok(())
}

/// A decoded snapshot with the update section left opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSnapshot<'a> {
    pub prelude: SnapshotPrelude,
    pub despawned: Vec<i32>,
    pub updates: &'a [u8],
}

/// Decodes a snapshot packet down to the update section.
pub fn decode_snapshot<'a>(buf: &'a [u8], limits: &Limits) -> WireResult<DecodedSnapshot<'a>> {
    if buf.len() > limits.max_packet_bytes {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::PacketBytes,
            limit: limits.max_packet_bytes,
            actual: buf.len(),
        });
    }
    let mut reader = BitReader::new(buf);
    let header = SnapshotHeader::decode(&mut reader)?;

    let type_count = reader.read_bits(8)? as usize;
    if type_count > limits.max_new_types_per_snapshot {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::NewTypes,
            limit: limits.max_new_types_per_snapshot,
            actual: type_count,
        });
    }
    let mut new_types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        let hi = u128::from(reader.read_bits(64)?);
        let lo = u128::from(reader.read_bits(64)?);
        let content_hash = reader.read_bits(64)?;
        new_types.push(TypeAnnouncement {
            id: (hi << 64) | lo,
            content_hash,
        });
    }
    let relevant_ghost_count = reader.read_packed_u32()?;
    let prespawn = reader.read_bool()?;
    let despawn_len = reader.read_bits(32)? as usize;
    let update_len = reader.read_bits(32)? as usize;
    reader.align_to_byte()?;

    let despawn_start = reader.bit_position() / 8;
    let count = reader.read_packed_u32()? as usize;
    if count > limits.max_despawns_per_snapshot {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::Despawns,
            limit: limits.max_despawns_per_snapshot,
            actual: count,
        });
    }
    let mut despawned = Vec::with_capacity(count);
    for _ in 0..count {
        despawned.push(reader.read_packed_i32()?);
    }
    reader.align_to_byte()?;
    let despawn_end = reader.bit_position() / 8;
    if despawn_end - despawn_start != despawn_len {
        return Err(DecodeError::SectionLengthMismatch {
            section: Section::Despawns,
            declared: despawn_len,
            actual: despawn_end - despawn_start,
        });
    }

    let available = buf.len() - despawn_end;
    if update_len > available {
        return Err(DecodeError::SectionLengthMismatch {
            section: Section::Updates,
            declared: update_len,
            actual: available,
        });
    }

    Ok(DecodedSnapshot {
        prelude: SnapshotPrelude {
            header,
            new_types,
            relevant_ghost_count,
            prespawn,
        },
        despawned,
        updates: &buf[despawn_end..despawn_end + update_len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prelude() -> SnapshotPrelude {
        SnapshotPrelude {
            header: SnapshotHeader {
                local_time: 5,
                remote_time: 4,
                command_age: 1,
                sequence: 9,
                tick: 100,
            },
            new_types: vec![TypeAnnouncement {
                id: 0x0123_4567_89AB_CDEF_FEDC_BA98_7654_3210,
                content_hash: 0xDEAD_BEEF,
            }],
            relevant_ghost_count: 3,
            prespawn: false,
        }
    }

    fn write_packet(despawns: &[i32], updates: &[u8]) -> Vec<u8> {
        let limits = Limits::default();
        let mut writer = BitWriter::new();
        let placeholders = write_prelude(&mut writer, &prelude(), &limits).unwrap();
        let start = writer.bytes_written();
        write_despawn_list(&mut writer, despawns, &limits).unwrap();
        let despawn_bytes = writer.bytes_written() - start;
        placeholders
            .patch_despawn_len(&mut writer, despawn_bytes)
            .unwrap();
        for &byte in updates {
            writer.write_bits(u64::from(byte), 8).unwrap();
        }
        placeholders
            .patch_update_len(&mut writer, updates.len())
            .unwrap();
        writer.finish()
    }

    #[test]
    fn despawns_and_updates_are_framed() {
        let bytes = write_packet(&[42, -7, 1], &[0xAA, 0xBB]);
        let decoded = decode_snapshot(&bytes, &Limits::default()).unwrap();
        assert_eq!(decoded.prelude, prelude());
        assert_eq!(decoded.despawned, vec![42, -7, 1]);
        assert_eq!(decoded.updates, &[0xAA, 0xBB]);
    }

    #[test]
    fn empty_despawn_list_is_one_byte() {
        let limits = Limits::default();
        let mut writer = BitWriter::new();
        write_despawn_list(&mut writer, &[], &limits).unwrap();
        assert_eq!(writer.bytes_written(), 1);
    }

    #[test]
    fn too_many_despawns_rejected() {
        let limits = Limits::for_testing();
        let ids: Vec<i32> = (1..=9).collect();
        let mut writer = BitWriter::new();
        let err = write_despawn_list(&mut writer, &ids, &limits).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::LimitsExceeded {
                kind: LimitKind::Despawns,
                ..
            }
        ));
        assert_eq!(writer.bits_written(), 0);
    }

    #[test]
    fn too_many_new_types_rejected() {
        let limits = Limits::for_testing();
        let mut prelude = prelude();
        prelude.new_types = vec![prelude.new_types[0]; 5];
        let mut writer = BitWriter::new();
        assert!(write_prelude(&mut writer, &prelude, &limits).is_err());
    }

    #[test]
    fn bad_despawn_length_detected() {
        let limits = Limits::default();
        let mut writer = BitWriter::new();
        let placeholders = write_prelude(&mut writer, &prelude(), &limits).unwrap();
        write_despawn_list(&mut writer, &[42], &limits).unwrap();
        placeholders.patch_despawn_len(&mut writer, 7).unwrap();
        let err = decode_snapshot(&writer.finish(), &limits).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SectionLengthMismatch {
                section: Section::Despawns,
                declared: 7,
                ..
            }
        ));
    }

    #[test]
    fn truncated_updates_detected() {
        let limits = Limits::default();
        let mut writer = BitWriter::new();
        let placeholders = write_prelude(&mut writer, &prelude(), &limits).unwrap();
        let start = writer.bytes_written();
        write_despawn_list(&mut writer, &[], &limits).unwrap();
        let despawn_bytes = writer.bytes_written() - start;
        placeholders
            .patch_despawn_len(&mut writer, despawn_bytes)
            .unwrap();
        placeholders.patch_update_len(&mut writer, 16).unwrap();
        let err = decode_snapshot(&writer.finish(), &limits).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SectionLengthMismatch {
                section: Section::Updates,
                declared: 16,
                actual: 0,
            }
        ));
    }
}
