//! Receiving side of the snapshot stream.
//!
//! [`ClientMirror`] decodes packets produced by the sender and keeps the
//! client's view of every ghost. It exists to drive the sender in tests
//! and simulations: acks come from what the mirror actually decoded, and
//! decoded values can be compared with the server world.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bitstream::{BitError, BitReader};
use schema::{GhostTypeIndex, GhostTypeInfo, TypeRegistry, CHANGE_MASK_OFFSET};
use tracing::trace;
use wire::{DecodeError, Limits, TypeAnnouncement};

use crate::ack::SnapshotAck;
use crate::config::{GhostSendConfig, MAX_BASELINES, MAX_BASELINE_AGE};
use crate::predict::DeltaPredictor;
use crate::record::{decode_field, read_bit, read_word, write_word};
use crate::serializer::{mask_bit, read_field, read_words, words_at};
use crate::types::{GhostId, SnapshotTick};
use crate::world::FieldValue;

/// Records kept per ghost for baseline lookups.
const MIRROR_HISTORY: usize = 64;

/// Upper bound on a decoded buffer's element count.
const MAX_BUFFER_ELEMENTS: u32 = 1 << 16;

/// Result type for mirror decoding.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors raised while decoding a snapshot on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// The packet framing is invalid.
    Wire(DecodeError),
    /// The update section ended early or held an invalid code.
    Bits(BitError),
    /// A chunk names a type that was never announced.
    UnknownGhostType { index: u32 },
    /// An announced type does not match the local registry.
    TypeMismatch { index: usize },
    /// An update references a baseline the client does not hold.
    MissingBaseline { ghost: i32, tick: SnapshotTick },
    /// A ghost id of zero.
    InvalidGhostId,
    /// The update section is structurally invalid.
    Malformed { reason: &'static str },
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(err) => write!(f, "wire error: {err}"),
            Self::Bits(err) => write!(f, "update section: {err}"),
            Self::UnknownGhostType { index } => write!(f, "ghost type {index} was not announced"),
            Self::TypeMismatch { index } => {
                write!(f, "announced type {index} does not match the local registry")
            }
            Self::MissingBaseline { ghost, tick } => {
                write!(f, "ghost {ghost} has no record for baseline tick {tick}")
            }
            Self::InvalidGhostId => write!(f, "ghost id 0 is reserved"),
            Self::Malformed { reason } => write!(f, "malformed update section: {reason}"),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wire(err) => Some(err),
            Self::Bits(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for MirrorError {
    fn from(err: DecodeError) -> Self {
        Self::Wire(err)
    }
}

impl From<BitError> for MirrorError {
    fn from(err: BitError) -> Self {
        Self::Bits(err)
    }
}

#[derive(Debug, Clone)]
struct MirrorRecord {
    tick: SnapshotTick,
    record: Vec<u8>,
    buffers: Vec<Vec<u32>>,
}

/// The client's copy of one ghost.
#[derive(Debug, Clone)]
pub struct MirrorGhost {
    pub ghost_id: GhostId,
    pub ghost_type: GhostTypeIndex,
    pub spawn_tick: SnapshotTick,
    records: VecDeque<MirrorRecord>,
}

impl MirrorGhost {
    fn record_at(&self, tick: SnapshotTick) -> Option<&MirrorRecord> {
        self.records.iter().rev().find(|record| record.tick == tick)
    }

    fn latest(&self) -> Option<&MirrorRecord> {
        self.records.back()
    }

    /// Tick of the newest update received.
    #[must_use]
    pub fn last_update(&self) -> Option<SnapshotTick> {
        self.latest().map(|record| record.tick)
    }

    /// Current value of field `field` of component `component`.
    #[must_use]
    pub fn field(
        &self,
        info: &GhostTypeInfo,
        component: usize,
        field: usize,
    ) -> Option<FieldValue> {
        let layout = info.components.get(component)?;
        if layout.buffer {
            return None;
        }
        let codec = layout.def.fields.get(field)?.codec;
        let record = self.latest()?;
        Some(decode_field(codec, read_word(&record.record, layout.offset + field * 4)))
    }

    /// Current elements of buffer component `component`.
    #[must_use]
    pub fn buffer(&self, info: &GhostTypeInfo, component: usize) -> Option<Vec<Vec<FieldValue>>> {
        let layout = info.components.get(component)?;
        if !layout.buffer {
            return None;
        }
        let ordinal = info.components[..component].iter().filter(|c| c.buffer).count();
        let words = self.latest()?.buffers.get(ordinal)?;
        let fields = layout.field_count().max(1);
        Some(
            words
                .chunks(fields)
                .map(|element| {
                    element
                        .iter()
                        .zip(&layout.def.fields)
                        .map(|(word, field)| decode_field(field.codec, *word))
                        .collect()
                })
                .collect(),
        )
    }

    /// Enable bit of component `component`, if it is enableable.
    #[must_use]
    pub fn enabled(&self, info: &GhostTypeInfo, component: usize) -> Option<bool> {
        let bit = info.components.get(component)?.enable_bit?;
        Some(read_bit(&self.latest()?.record, info.enable_offset(), bit))
    }

    fn push(&mut self, record: MirrorRecord) {
        if self.records.len() == MIRROR_HISTORY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// Summary of one applied packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorUpdate {
    pub tick: SnapshotTick,
    pub updated: usize,
    pub despawned: usize,
    pub new_types: usize,
}

/// A decoding client.
#[derive(Debug, Clone)]
pub struct ClientMirror {
    registry: TypeRegistry,
    limits: Limits,
    size_prefix: bool,
    announced: Vec<TypeAnnouncement>,
    ghosts: HashMap<GhostId, MirrorGhost>,
    ack: SnapshotAck,
    relevant_ghost_count: u32,
}

impl ClientMirror {
    /// Creates a mirror that decodes packets sent under `config`.
    #[must_use]
    pub fn new(registry: TypeRegistry, config: &GhostSendConfig) -> Self {
        Self {
            registry,
            limits: config.wire_limits(),
            size_prefix: config.entity_size_prefix,
            announced: Vec::new(),
            ghosts: HashMap::new(),
            ack: SnapshotAck::new(),
            relevant_ghost_count: 0,
        }
    }

    /// Acks to report back to the sender.
    #[must_use]
    pub const fn ack(&self) -> &SnapshotAck {
        &self.ack
    }

    #[must_use]
    pub fn ghost(&self, ghost_id: GhostId) -> Option<&MirrorGhost> {
        self.ghosts.get(&ghost_id)
    }

    pub fn ghosts(&self) -> impl Iterator<Item = &MirrorGhost> {
        self.ghosts.values()
    }

    #[must_use]
    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    /// Types announced so far, in index order.
    #[must_use]
    pub fn announced_types(&self) -> &[TypeAnnouncement] {
        &self.announced
    }

    /// Ghost count the server reported in the last packet.
    #[must_use]
    pub const fn relevant_ghost_count(&self) -> u32 {
        self.relevant_ghost_count
    }

    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Decodes and applies one packet.
    ///
    /// A packet that fails to decode is not acked; ghosts it touched before
    /// the failure keep the partial update.
    pub fn receive(&mut self, packet: &[u8]) -> MirrorResult<MirrorUpdate> {
        let decoded = wire::decode_snapshot(packet, &self.limits)?;
        let tick = SnapshotTick::new(decoded.prelude.header.tick);

        let mut new_types = 0;
        for announcement in &decoded.prelude.new_types {
            if self.announced.iter().any(|known| known.id == announcement.id) {
                continue;
            }
            let index = self.announced.len();
            let matches = self
                .registry
                .get(GhostTypeIndex::new(index as u32))
                .is_some_and(|info| {
                    info.id.raw() == announcement.id
                        && info.content_hash == announcement.content_hash
                });
            if !matches {
                return Err(MirrorError::TypeMismatch { index });
            }
            self.announced.push(*announcement);
            new_types += 1;
        }

        let mut despawned = 0;
        for raw in &decoded.despawned {
            if let Some(ghost_id) = GhostId::new(*raw) {
                if self.ghosts.remove(&ghost_id).is_some() {
                    despawned += 1;
                }
            }
        }

        let mut reader = BitReader::new(decoded.updates);
        let mut updated = 0;
        while reader.bits_remaining() >= 8 {
            updated += self.read_chunk(&mut reader, tick)?;
        }

        self.relevant_ghost_count = decoded.prelude.relevant_ghost_count;
        self.ack.record(tick);
        trace!(%tick, updated, despawned, "snapshot applied");
        Ok(MirrorUpdate {
            tick,
            updated,
            despawned,
            new_types,
        })
    }

    fn type_info(&self, raw: u32) -> MirrorResult<&GhostTypeInfo> {
        if raw as usize >= self.announced.len() {
            return Err(MirrorError::UnknownGhostType { index: raw });
        }
        self.registry
            .get(GhostTypeIndex::new(raw))
            .ok_or(MirrorError::UnknownGhostType { index: raw })
    }

    fn read_chunk(
        &mut self,
        reader: &mut BitReader<'_>,
        tick: SnapshotTick,
    ) -> MirrorResult<usize> {
        let type_index = reader.read_packed_u32()?;
        let info = self.type_info(type_index)?.clone();
        let count = reader.read_packed_u32()? as usize;
        if count == 0 {
            return Err(MirrorError::Malformed {
                reason: "empty chunk",
            });
        }

        let mut decoded = 0;
        let mut previous_id = 0i32;
        while decoded < count {
            let baselines = read_baseline_ticks(reader, tick)?;
            let run = reader.read_packed_u32()? as usize;
            if run == 0 || decoded + run > count {
                return Err(MirrorError::Malformed {
                    reason: "baseline run length",
                });
            }
            for _ in 0..run {
                let id = previous_id.wrapping_add(reader.read_packed_i32()?);
                previous_id = id;
                let spawn = if baselines[0].is_none() {
                    Some(SnapshotTick::new(tick.raw().wrapping_sub(reader.read_packed_u32()?)))
                } else {
                    None
                };
                if self.size_prefix {
                    reader.read_packed_u32()?;
                }
                self.read_entity(reader, &info, id, &baselines, spawn, tick, true)?;
            }
            decoded += run;
        }
        Ok(count)
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn read_entity(
        &mut self,
        reader: &mut BitReader<'_>,
        info: &GhostTypeInfo,
        id: i32,
        baselines: &[Option<SnapshotTick>; MAX_BASELINES],
        spawn: Option<SnapshotTick>,
        tick: SnapshotTick,
        root: bool,
    ) -> MirrorResult<()> {
        let ghost_id = GhostId::new(id).ok_or(MirrorError::InvalidGhostId)?;
        let mut bases: Vec<MirrorRecord> = Vec::with_capacity(MAX_BASELINES);
        for baseline in baselines.iter().flatten() {
            let record = self
                .ghosts
                .get(&ghost_id)
                .and_then(|ghost| ghost.record_at(*baseline))
                .ok_or(MirrorError::MissingBaseline {
                    ghost: id,
                    tick: *baseline,
                })?;
            bases.push(record.clone());
        }
        let b0 = bases.first();

        let b0_mask = b0.map(|b0| words_at(&b0.record, CHANGE_MASK_OFFSET, info.change_mask_words));
        let mask = read_words(
            reader,
            info.change_mask_words,
            info.change_mask_bits,
            b0_mask.as_deref(),
        )?;
        let b0_enable = b0.map(|b0| words_at(&b0.record, info.enable_offset(), info.enable_words));
        let enable = read_words(reader, info.enable_words, info.enable_bits, b0_enable.as_deref())?;

        let buffer_count = info.components.iter().filter(|c| c.buffer).count();
        let mut record = b0.map_or_else(|| vec![0u8; info.record_size], |b0| b0.record.clone());
        let mut buffers =
            b0.map_or_else(|| vec![Vec::new(); buffer_count], |b0| b0.buffers.clone());

        let ticks: Vec<SnapshotTick> = baselines.iter().flatten().copied().collect();
        let predictor = DeltaPredictor::new(tick, &ticks);
        let base_word =
            |index: usize, at: usize| bases.get(index).map_or(0, |b| read_word(&b.record, at));
        for layout in info.components.iter().filter(|c| !c.buffer) {
            for (n, field) in layout.def.fields.iter().enumerate() {
                if !mask_bit(&mask, layout.change_bit + n) {
                    continue;
                }
                let at = layout.offset + n * 4;
                let predicted =
                    predictor.predict(base_word(0, at), base_word(1, at), base_word(2, at));
                let value = read_field(reader, field.codec, predicted)?;
                write_word(&mut record, at, value);
            }
        }

        if info.has_buffers {
            let dynamic_bits = reader.read_packed_u32()? as usize;
            let begin = reader.bit_position();
            let mut ordinal = 0;
            for layout in info.components.iter().filter(|c| c.buffer) {
                ordinal += 1;
                if !mask_bit(&mask, layout.change_bit) {
                    continue;
                }
                let base = b0.map_or(&[][..], |b0| b0.buffers[ordinal - 1].as_slice());
                let base_len = b0.map_or(0, |b0| read_word(&b0.record, layout.offset));
                let len = reader.read_packed_u32_delta(base_len)?;
                if len > MAX_BUFFER_ELEMENTS {
                    return Err(MirrorError::Malformed {
                        reason: "buffer length",
                    });
                }
                let fields = layout.field_count();
                let mut words = Vec::with_capacity(len as usize * fields);
                for element in 0..len as usize {
                    let mut changed = Vec::with_capacity(fields);
                    for _ in 0..fields {
                        changed.push(reader.read_bool()?);
                    }
                    for (n, field) in layout.def.fields.iter().enumerate() {
                        let base_word = base.get(element * fields + n).copied().unwrap_or(0);
                        words.push(if changed[n] {
                            read_field(reader, field.codec, base_word)?
                        } else {
                            base_word
                        });
                    }
                }
                write_word(&mut record, layout.offset, len);
                buffers[ordinal - 1] = words;
            }
            if reader.bit_position() - begin != dynamic_bits {
                return Err(MirrorError::Malformed {
                    reason: "dynamic section length",
                });
            }
        }

        write_word(&mut record, 0, tick.raw());
        for (n, word) in mask.iter().enumerate() {
            write_word(&mut record, CHANGE_MASK_OFFSET + n * 4, *word);
        }
        for (n, word) in enable.iter().enumerate() {
            write_word(&mut record, info.enable_offset() + n * 4, *word);
        }

        let ghost = self.ghosts.entry(ghost_id).or_insert_with(|| MirrorGhost {
            ghost_id,
            ghost_type: info.index,
            spawn_tick: spawn.unwrap_or(tick),
            records: VecDeque::new(),
        });
        if let Some(spawn) = spawn {
            ghost.spawn_tick = spawn;
            ghost.ghost_type = info.index;
        }
        ghost.push(MirrorRecord {
            tick,
            record,
            buffers,
        });

        if root && info.group_root {
            let members = reader.read_packed_u32()?;
            for _ in 0..members {
                let member_type = reader.read_packed_u32()?;
                let member_info = self.type_info(member_type)?.clone();
                if member_info.group_root {
                    return Err(MirrorError::Malformed {
                        reason: "nested ghost group",
                    });
                }
                let member_id = reader.read_packed_i32()?;
                let member_baselines = read_baseline_ticks(reader, tick)?;
                let member_spawn = if member_baselines[0].is_none() {
                    Some(SnapshotTick::new(tick.raw().wrapping_sub(reader.read_packed_u32()?)))
                } else {
                    None
                };
                self.read_entity(
                    reader,
                    &member_info,
                    member_id,
                    &member_baselines,
                    member_spawn,
                    tick,
                    false,
                )?;
            }
        }
        Ok(())
    }
}

fn read_baseline_ticks(
    reader: &mut BitReader<'_>,
    tick: SnapshotTick,
) -> MirrorResult<[Option<SnapshotTick>; MAX_BASELINES]> {
    let mut baselines = [None; MAX_BASELINES];
    for baseline in &mut baselines {
        let delta = reader.read_packed_u32()?;
        if delta != MAX_BASELINE_AGE {
            *baseline = Some(SnapshotTick::new(tick.raw().wrapping_sub(delta)));
        }
    }
    Ok(baselines)
}
