//! Per-connection chunk serializer.
//!
//! A chunk goes out as:
//!
//! ```text
//! type index             packed u32
//! entity count           packed u32
//! per baseline run       3 packed tick deltas (MAX_BASELINE_AGE = absent),
//!                        packed run length
//!   per entity           packed zigzag ghost id delta
//!                        packed spawn tick delta (no b0 only)
//!                        packed payload bits (size prefix only)
//!                        payload
//! ```
//!
//! A payload is the change mask, the enable bits, the changed field values,
//! the dynamic sub-stream for buffers and, for group roots, every member
//! inline. Nothing is written for a chunk whose entities were all skipped.
//!
//! Entities are first serialized into the connection's scratch stream. The
//! exact bit cost of each prefix is then known, so the largest prefix that
//! fits the packet is copied over and the history writes of the rest are
//! rolled back.

use std::ops::Range;

use bitstream::{packed_u32_len, BitError, BitReader, BitResult, BitWriter};
use schema::{
    ClientKind, FieldCodec, GhostMode, GhostTypeIndex, GhostTypeInfo, SendTo, TypeRegistry,
    CHANGE_MASK_OFFSET,
};
use tracing::{debug, trace};

use crate::ack::SnapshotAck;
use crate::config::{GhostSendConfig, MAX_BASELINES, MAX_BASELINE_AGE, MAX_SCRATCH_RETRIES};
use crate::connection::ConnectionState;
use crate::error::{SerializeError, SerializeResult};
use crate::history::{BaselineData, ChunkSendState, ConnectionHistory};
use crate::predict::DeltaPredictor;
use crate::profile::ComponentProfile;
use crate::record::{read_word, write_word, EntityImage, PreSerialized};
use crate::relevancy::RelevancyFilter;
use crate::rollback::{RollbackLog, RollbackMark, RollbackOp};
use crate::types::{ChunkId, NetworkId, SnapshotTick, SpawnedGhost};
use crate::world::{GhostChunk, GhostWorld};

/// Shared inputs for serializing one connection's chunks this tick.
#[derive(Clone, Copy)]
pub struct SerializeContext<'a> {
    pub registry: &'a TypeRegistry,
    pub config: &'a GhostSendConfig,
    pub world: &'a GhostWorld,
    /// Images built before the connection pass. Missing entries are built
    /// on demand.
    pub images: &'a PreSerialized,
    pub relevancy: &'a dyn RelevancyFilter,
    pub tick: SnapshotTick,
}

/// Outcome of [`serialize_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWriteResult {
    /// Nothing needed sending.
    Skipped,
    /// A group member is not ready yet; try again next tick.
    Deferred,
    /// Entities were written. `resume_index` is set when the packet filled
    /// before the end of the chunk.
    Written {
        entities: usize,
        resume_index: Option<usize>,
    },
    /// Not even the first pending entity fit.
    Full { resume_index: usize },
}

impl ChunkWriteResult {
    /// Returns `true` if the packet has no room for more chunks.
    #[must_use]
    pub const fn is_packet_full(&self) -> bool {
        matches!(
            self,
            Self::Full { .. }
                | Self::Written {
                    resume_index: Some(_),
                    ..
                }
        )
    }
}

enum Failure {
    ScratchFull,
    Fatal(SerializeError),
}

impl From<SerializeError> for Failure {
    fn from(err: SerializeError) -> Self {
        match err {
            SerializeError::Bits(bits) => bits.into(),
            other => Self::Fatal(other),
        }
    }
}

impl From<BitError> for Failure {
    fn from(err: BitError) -> Self {
        if err.is_overflow() {
            Self::ScratchFull
        } else {
            Self::Fatal(SerializeError::Bits(err))
        }
    }
}

type Attempt<T> = Result<T, Failure>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Root { static_skip: bool },
    Member,
}

struct Parts<'c> {
    history: &'c mut ConnectionHistory,
    rollback: &'c mut RollbackLog,
    profile: &'c mut ComponentProfile,
    main: &'c mut BitWriter,
    dynamic: &'c mut BitWriter,
    ack: &'c SnapshotAck,
    network_id: NetworkId,
}

struct Entry {
    entity: usize,
    ghost: SpawnedGhost,
    baselines: [Option<SnapshotTick>; MAX_BASELINES],
    bits: Range<usize>,
    emitted: bool,
    mark: RollbackMark,
    sent: Vec<(SpawnedGhost, GhostTypeIndex)>,
}

struct Collected {
    entries: Vec<Entry>,
    /// First relevant entity not attempted because the payloads already
    /// exceeded the packet.
    stopped_at: Option<usize>,
}

/// Serializes chunk `chunk_index` of the world into `packet`, starting at
/// entity `start_index`.
///
/// History writes are logged in the connection's rollback log, so the
/// caller can undo a whole packet with a connection checkpoint.
///
/// # Errors
///
/// Returns an error for malformed world data or when the scratch stream
/// cannot hold a single entity after repeated growth. Scratch overflow is
/// retried internally and never surfaces as a bit error.
pub fn serialize_chunk(
    ctx: &SerializeContext<'_>,
    conn: &mut ConnectionState,
    chunk_index: usize,
    start_index: usize,
    packet: &mut BitWriter,
) -> SerializeResult<ChunkWriteResult> {
    let Some(chunk) = ctx.world.chunk(chunk_index) else {
        return Ok(ChunkWriteResult::Skipped);
    };
    let info = type_info(ctx.registry, chunk.ghost_type)?;
    if info.group_root && !group_ready(ctx, conn, chunk) {
        trace!(chunk = %chunk.id, "group member not ready");
        return Ok(ChunkWriteResult::Deferred);
    }

    let tick = ctx.tick;
    let relevancy_version = ctx.relevancy.version();
    let keep = ctx.config.keep_history_across_structural_change;
    let (prior, structural) = {
        let (history, structural) = conn.history.get_or_create(chunk, info, keep)?;
        (history.send, structural)
    };

    if start_index == 0
        && !structural
        && can_skip_chunk(info)
        && prior.resume_index.is_none()
        && prior.relevancy_version == relevancy_version
        && prior.zero_change_version == chunk.change_version
        && prior
            .zero_change_tick
            .is_some_and(|zero| conn.ack.has_reached(zero))
    {
        update_send_state(conn, chunk.id, |state| state.last_send_tick = Some(tick));
        trace!(chunk = %chunk.id, "unchanged chunk skipped");
        return Ok(ChunkWriteResult::Skipped);
    }

    let relevant = relevancy_pass(ctx, conn, chunk);
    let relevant_count = relevant.iter().filter(|r| **r).count();

    let chunk_mark = conn.rollback.mark();
    let budget = packet.remaining_bits();
    let mut attempts = 0;
    let collected = loop {
        conn.scratch.clear();
        match collect_entries(ctx, conn, chunk, info, start_index, &relevant, budget) {
            Ok(collected) => break collected,
            Err(Failure::ScratchFull) => {
                conn.rollback.rollback_to(chunk_mark, &mut conn.history);
                attempts += 1;
                if attempts > MAX_SCRATCH_RETRIES {
                    return Err(SerializeError::ScratchExhausted {
                        attempts,
                        capacity: conn.scratch.capacity(),
                    });
                }
                conn.scratch.grow();
                debug!(
                    chunk = %chunk.id,
                    capacity = conn.scratch.capacity(),
                    "scratch stream grown"
                );
            }
            Err(Failure::Fatal(err)) => {
                conn.rollback.rollback_to(chunk_mark, &mut conn.history);
                return Err(err);
            }
        }
    };

    let fitted = fit_entries(
        &collected.entries,
        chunk.ghost_type,
        tick,
        packet.remaining_bits(),
        ctx.config.entity_size_prefix,
    );
    let entries = &collected.entries;
    if let Some(cut) = entries.get(fitted) {
        conn.rollback.rollback_to(cut.mark, &mut conn.history);
    }
    let resume_index = entries
        .get(fitted)
        .map(|entry| entry.entity)
        .or(collected.stopped_at);

    if fitted == 0 {
        if let Some(resume_index) = resume_index {
            conn.rollback.rollback_to(chunk_mark, &mut conn.history);
            return Ok(ChunkWriteResult::Full { resume_index });
        }
    }

    let kept = &entries[..fitted];
    let packet_mark = packet.mark();
    let written = write_chunk(
        packet,
        conn.scratch.main(),
        kept,
        chunk.ghost_type,
        tick,
        ctx.config,
    );
    if let Err(err) = written {
        packet.rewind(packet_mark);
        conn.rollback.rollback_to(chunk_mark, &mut conn.history);
        if err.is_overflow() {
            return Ok(ChunkWriteResult::Full {
                resume_index: start_index,
            });
        }
        return Err(err.into());
    }

    for entry in kept {
        for (ghost, ghost_type) in &entry.sent {
            conn.despawns.mark_sent(*ghost, *ghost_type, chunk.id)?;
        }
    }

    let emitted = kept.iter().filter(|entry| entry.emitted).count();
    let result = if let Some(resume_index) = resume_index {
        update_send_state(conn, chunk.id, |state| {
            state.resume_index = Some(resume_index);
            state.all_irrelevant = relevant_count == 0;
            state.zero_change_tick = None;
        });
        ChunkWriteResult::Written {
            entities: emitted,
            resume_index: Some(resume_index),
        }
    } else {
        let change_version = chunk.change_version;
        update_send_state(conn, chunk.id, |state| {
            state.last_send_tick = Some(tick);
            state.resume_index = None;
            state.all_irrelevant = relevant_count == 0;
            state.relevancy_version = relevancy_version;
            if emitted > 0 || start_index > 0 {
                state.zero_change_tick = None;
            } else if state.zero_change_tick.is_none()
                || state.zero_change_version != change_version
            {
                state.zero_change_tick = Some(tick);
                state.zero_change_version = change_version;
            }
        });
        if emitted == 0 {
            ChunkWriteResult::Skipped
        } else {
            ChunkWriteResult::Written {
                entities: emitted,
                resume_index: None,
            }
        }
    };
    trace!(chunk = %chunk.id, ?result, "chunk serialized");
    Ok(result)
}

fn type_info(registry: &TypeRegistry, index: GhostTypeIndex) -> SerializeResult<&GhostTypeInfo> {
    registry
        .get(index)
        .ok_or(SerializeError::UnknownGhostType { index })
}

const fn can_skip_chunk(info: &GhostTypeInfo) -> bool {
    info.static_optimization && !info.group_root
}

fn group_ready(ctx: &SerializeContext<'_>, conn: &ConnectionState, chunk: &GhostChunk) -> bool {
    chunk.entities.iter().all(|entity| {
        entity.group.iter().all(|stamp| {
            let Some(location) = ctx.world.locate(*stamp) else {
                return false;
            };
            let Some(member_chunk) = ctx.world.chunk(location.chunk) else {
                return false;
            };
            member_chunk
                .entities
                .get(location.entity)
                .is_some_and(|member| member.ghost.is_some())
                && conn.types.is_announced(member_chunk.ghost_type)
        })
    })
}

fn update_send_state(
    conn: &mut ConnectionState,
    chunk: ChunkId,
    update: impl FnOnce(&mut ChunkSendState),
) {
    if let Some(history) = conn.history.get_mut(chunk) {
        conn.rollback.push(RollbackOp::RestoreChunk {
            chunk,
            state: history.send,
        });
        update(&mut history.send);
    }
}

/// Applies the connection's relevancy to every ghost of the chunk.
///
/// Irrelevant ghosts lose their history so they start over from a full
/// send when they come back.
fn relevancy_pass(
    ctx: &SerializeContext<'_>,
    conn: &mut ConnectionState,
    chunk: &GhostChunk,
) -> Vec<bool> {
    let mut relevant = vec![false; chunk.len()];
    for (position, entity) in chunk.entities.iter().enumerate() {
        let Some(ghost) = entity.ghost else {
            continue;
        };
        if ctx.relevancy.is_relevant(ghost.ghost_id) {
            relevant[position] = true;
            conn.despawns.on_relevant(ghost);
        } else {
            conn.despawns.on_irrelevant(ghost);
            if let Some(history) = conn.history.get_mut(chunk.id) {
                history.forget_entity(position);
            }
        }
    }
    relevant
}

fn collect_entries(
    ctx: &SerializeContext<'_>,
    conn: &mut ConnectionState,
    chunk: &GhostChunk,
    info: &GhostTypeInfo,
    start_index: usize,
    relevant: &[bool],
    budget: usize,
) -> Attempt<Collected> {
    let ConnectionState {
        network_id,
        ack,
        history,
        profile,
        scratch,
        rollback,
        ..
    } = conn;
    let (main, dynamic) = scratch.streams_mut();
    let mut parts = Parts {
        history,
        rollback,
        profile,
        main,
        dynamic,
        ack,
        network_id: *network_id,
    };

    let mut entries = Vec::new();
    let mut stopped_at = None;
    for position in start_index..chunk.len() {
        if !relevant[position] {
            continue;
        }
        let Some(ghost) = chunk.entities[position].ghost else {
            continue;
        };
        if parts.main.bits_written() > budget {
            stopped_at = Some(position);
            break;
        }
        let mark = parts.rollback.mark();
        let begin = parts.main.bits_written();
        let mut sent = Vec::new();
        let outcome = serialize_entity(
            ctx,
            &mut parts,
            chunk,
            info,
            position,
            ghost,
            Role::Root {
                static_skip: can_skip_chunk(info),
            },
            &mut sent,
        )?;
        entries.push(Entry {
            entity: position,
            ghost,
            baselines: outcome.baselines,
            bits: begin..parts.main.bits_written(),
            emitted: outcome.emitted,
            mark,
            sent,
        });
    }
    Ok(Collected {
        entries,
        stopped_at,
    })
}

struct EntityOutcome {
    baselines: [Option<SnapshotTick>; MAX_BASELINES],
    emitted: bool,
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn serialize_entity(
    ctx: &SerializeContext<'_>,
    parts: &mut Parts<'_>,
    chunk: &GhostChunk,
    info: &GhostTypeInfo,
    position: usize,
    ghost: SpawnedGhost,
    role: Role,
    sent: &mut Vec<(SpawnedGhost, GhostTypeIndex)>,
) -> Attempt<EntityOutcome> {
    let entity = &chunk.entities[position];
    let tick = ctx.tick;
    let built;
    let image = if let Some(image) = ctx.images.get(chunk.id, position) {
        image
    } else {
        built = EntityImage::build(info, entity)?;
        &built
    };

    let keep = ctx.config.keep_history_across_structural_change;
    let (history, _) = parts.history.get_or_create(chunk, info, keep)?;
    let slot = history.begin_write(tick);
    let candidates = history.baseline_candidates(
        position,
        entity.stamp,
        parts.ack,
        tick,
        ctx.config.max_baseline_age,
        ctx.config.baseline_count(),
    );
    let baselines = candidates
        .iter()
        .map(|candidate| history.load_baseline(*candidate, position, info))
        .collect::<SerializeResult<Vec<BaselineData>>>()?;
    let mut ticks = [None; MAX_BASELINES];
    for (slot_tick, baseline) in ticks.iter_mut().zip(&baselines) {
        *slot_tick = Some(baseline.tick);
    }
    let b0 = baselines.first();

    let mut record = image.record.clone();
    let mut buffers = image.buffers.clone();
    let eligible = eligibility(info, image, parts.network_id);
    if let Some(eligible) = &eligible {
        mask_ineligible(info, eligible, &mut record, &mut buffers, b0);
    }
    let mask = change_mask(info, eligible.as_deref(), &record, &buffers, b0);
    let enable = words_at(&record, info.enable_offset(), info.enable_words);

    // A newer unacked record may hold other values; skipping would leave the
    // client on them.
    let newest = history.latest_record_tick(
        position,
        entity.stamp,
        tick,
        ctx.config.max_baseline_age,
    );
    let static_skip = matches!(role, Role::Root { static_skip: true })
        && b0.is_some_and(|b0| {
            newest == Some(b0.tick)
                && mask.iter().all(|word| *word == 0)
                && words_at(&b0.record, info.enable_offset(), info.enable_words) == enable
        });
    if let (true, Some(b0)) = (static_skip, b0) {
        let dynamic_len =
            history.store(slot, position, entity.stamp, &b0.record, &b0.buffers, info)?;
        parts.rollback.push(RollbackOp::ClearEntity {
            chunk: chunk.id,
            slot,
            entity: position,
            dynamic_len,
        });
        return Ok(EntityOutcome {
            baselines: ticks,
            emitted: false,
        });
    }

    if role == Role::Member {
        write_baseline_ticks(parts.main, tick, &ticks)?;
        if b0.is_none() {
            parts.main.write_packed_u32(tick.ticks_since(ghost.spawn_tick) as u32)?;
        }
    }

    let b0_mask = b0.map(|b0| words_at(&b0.record, CHANGE_MASK_OFFSET, info.change_mask_words));
    write_words(parts.main, &mask, info.change_mask_bits, b0_mask.as_deref())?;
    let b0_enable = b0.map(|b0| words_at(&b0.record, info.enable_offset(), info.enable_words));
    write_words(parts.main, &enable, info.enable_bits, b0_enable.as_deref())?;

    let baseline_ticks: Vec<SnapshotTick> = ticks.iter().flatten().copied().collect();
    let predictor = DeltaPredictor::new(tick, &baseline_ticks);
    for (index, layout) in info.components.iter().enumerate() {
        if layout.buffer {
            continue;
        }
        let begin = parts.main.bits_written();
        for (n, field) in layout.def.fields.iter().enumerate() {
            if !mask_bit(&mask, layout.change_bit + n) {
                continue;
            }
            let at = layout.offset + n * 4;
            let predicted = predictor.predict(
                baseline_word(&baselines, 0, at),
                baseline_word(&baselines, 1, at),
                baseline_word(&baselines, 2, at),
            );
            write_field(parts.main, field.codec, read_word(&record, at), predicted)?;
        }
        if ctx.config.profile_components {
            parts
                .profile
                .record(info.index, index, parts.main.bits_written() - begin);
        }
    }

    if info.has_buffers {
        parts.dynamic.clear();
        let mut ordinal = 0;
        for (index, layout) in info.components.iter().enumerate() {
            if !layout.buffer {
                continue;
            }
            let current = &buffers[ordinal];
            ordinal += 1;
            if !mask_bit(&mask, layout.change_bit) {
                continue;
            }
            let begin = parts.dynamic.bits_written();
            let len = read_word(&record, layout.offset);
            let base_len = b0.map_or(0, |b0| read_word(&b0.record, layout.offset));
            let base = b0.map_or(&[][..], |b0| b0.buffers[ordinal - 1].as_slice());
            parts.dynamic.write_packed_u32_delta(len, base_len)?;
            let fields = layout.field_count();
            for element in 0..len as usize {
                let words = &current[element * fields..(element + 1) * fields];
                let base_words = |n: usize| base.get(element * fields + n).copied().unwrap_or(0);
                for (n, word) in words.iter().enumerate() {
                    parts.dynamic.write_bool(*word != base_words(n))?;
                }
                for (n, (word, field)) in words.iter().zip(&layout.def.fields).enumerate() {
                    if *word != base_words(n) {
                        write_field(parts.dynamic, field.codec, *word, base_words(n))?;
                    }
                }
            }
            if ctx.config.profile_components {
                parts
                    .profile
                    .record(info.index, index, parts.dynamic.bits_written() - begin);
            }
        }
        let dynamic_bits = parts.dynamic.bits_written();
        parts.main.write_packed_u32(dynamic_bits as u32)?;
        parts.main.append_bits(parts.dynamic, 0..dynamic_bits)?;
    }

    write_word(&mut record, 0, tick.raw());
    for (n, word) in mask.iter().enumerate() {
        write_word(&mut record, CHANGE_MASK_OFFSET + n * 4, *word);
    }
    let dynamic_len = history.store(slot, position, entity.stamp, &record, &buffers, info)?;
    parts.rollback.push(RollbackOp::ClearEntity {
        chunk: chunk.id,
        slot,
        entity: position,
        dynamic_len,
    });
    sent.push((ghost, info.index));

    if matches!(role, Role::Root { .. }) && info.group_root {
        serialize_members(ctx, parts, chunk, position, sent)?;
    }

    Ok(EntityOutcome {
        baselines: ticks,
        emitted: true,
    })
}

fn serialize_members(
    ctx: &SerializeContext<'_>,
    parts: &mut Parts<'_>,
    chunk: &GhostChunk,
    position: usize,
    sent: &mut Vec<(SpawnedGhost, GhostTypeIndex)>,
) -> Attempt<()> {
    let root = &chunk.entities[position];
    parts.main.write_packed_u32(root.group.len() as u32)?;
    for (n, stamp) in root.group.iter().enumerate() {
        let missing = SerializeError::MissingChildEntity {
            entity: root.stamp,
            child: n + 1,
        };
        let Some(location) = ctx.world.locate(*stamp) else {
            return Err(missing.into());
        };
        let Some(member_chunk) = ctx.world.chunk(location.chunk) else {
            return Err(missing.into());
        };
        let Some(member_ghost) = member_chunk
            .entities
            .get(location.entity)
            .and_then(|member| member.ghost)
        else {
            return Err(missing.into());
        };
        let member_info = type_info(ctx.registry, member_chunk.ghost_type)?;
        if member_info.group_root {
            return Err(SerializeError::NestedGhostGroup {
                ghost: member_ghost.ghost_id,
            }
            .into());
        }
        parts.main.write_packed_u32(member_chunk.ghost_type.raw())?;
        parts.main.write_packed_i32(member_ghost.ghost_id.raw())?;
        serialize_entity(
            ctx,
            parts,
            member_chunk,
            member_info,
            location.entity,
            member_ghost,
            Role::Member,
            sent,
        )?;
    }
    Ok(())
}

/// Per-component send eligibility, or `None` when every component goes
/// to every connection.
fn eligibility(
    info: &GhostTypeInfo,
    image: &EntityImage,
    network_id: NetworkId,
) -> Option<Vec<bool>> {
    if !info.has_partial_send {
        return None;
    }
    let owner = image.owner(info);
    let is_owner = owner == Some(network_id.0);
    let kind = match info.mode {
        GhostMode::Predicted => ClientKind::Predicted,
        GhostMode::OwnerPredicted if is_owner => ClientKind::Predicted,
        _ => ClientKind::Interpolated,
    };
    Some(
        info.components
            .iter()
            .map(|layout| {
                layout.send_for.contains(kind)
                    && match layout.send_to {
                        SendTo::All => true,
                        SendTo::Owner => owner.is_none() || is_owner,
                        SendTo::NonOwner => owner.is_none() || !is_owner,
                    }
            })
            .collect(),
    )
}

/// Carries the newest baseline's bytes for components this connection does
/// not receive, so the stored record matches what the client holds.
fn mask_ineligible(
    info: &GhostTypeInfo,
    eligible: &[bool],
    record: &mut [u8],
    buffers: &mut [Vec<u32>],
    b0: Option<&BaselineData>,
) {
    let mut ordinal = 0;
    for (layout, eligible) in info.components.iter().zip(eligible) {
        if !*eligible {
            let range = layout.offset..layout.offset + layout.size;
            match b0 {
                Some(b0) => record[range.clone()].copy_from_slice(&b0.record[range]),
                None => record[range].fill(0),
            }
            if layout.buffer {
                buffers[ordinal] = b0.map(|b0| b0.buffers[ordinal].clone()).unwrap_or_default();
            }
        }
        if layout.buffer {
            ordinal += 1;
        }
    }
}

fn change_mask(
    info: &GhostTypeInfo,
    eligible: Option<&[bool]>,
    record: &[u8],
    buffers: &[Vec<u32>],
    b0: Option<&BaselineData>,
) -> Vec<u32> {
    let mut mask = vec![0u32; info.change_mask_words];
    let mut ordinal = 0;
    for (index, layout) in info.components.iter().enumerate() {
        let sent = eligible.map_or(true, |eligible| eligible[index]);
        if layout.buffer {
            let changed = match b0 {
                None => sent,
                Some(b0) => {
                    buffers[ordinal] != b0.buffers[ordinal]
                        || read_word(record, layout.offset) != read_word(&b0.record, layout.offset)
                }
            };
            set_mask_bit(&mut mask, layout.change_bit, changed);
            ordinal += 1;
            continue;
        }
        for n in 0..layout.field_count() {
            let at = layout.offset + n * 4;
            let changed = match b0 {
                None => sent,
                Some(b0) => read_word(record, at) != read_word(&b0.record, at),
            };
            set_mask_bit(&mut mask, layout.change_bit + n, changed);
        }
    }
    mask
}

fn set_mask_bit(mask: &mut [u32], bit: usize, value: bool) {
    if value {
        mask[bit / 32] |= 1 << (bit % 32);
    }
}

pub(crate) fn mask_bit(mask: &[u32], bit: usize) -> bool {
    mask.get(bit / 32).is_some_and(|word| word & (1 << (bit % 32)) != 0)
}

pub(crate) fn words_at(record: &[u8], offset: usize, count: usize) -> Vec<u32> {
    (0..count).map(|n| read_word(record, offset + n * 4)).collect()
}

fn baseline_word(baselines: &[BaselineData], index: usize, at: usize) -> u32 {
    baselines
        .get(index)
        .map_or(0, |baseline| read_word(&baseline.record, at))
}

/// Mask and enable words: raw without a baseline, packed deltas against the
/// baseline's words otherwise.
fn write_words(
    writer: &mut BitWriter,
    words: &[u32],
    total_bits: usize,
    base: Option<&[u32]>,
) -> BitResult<()> {
    for (n, word) in words.iter().enumerate() {
        match base {
            Some(base) => writer.write_packed_u32_delta(*word, base[n])?,
            None => writer.write_bits(u64::from(*word), word_bits(total_bits, n))?,
        }
    }
    Ok(())
}

pub(crate) fn read_words(
    reader: &mut BitReader<'_>,
    count: usize,
    total_bits: usize,
    base: Option<&[u32]>,
) -> BitResult<Vec<u32>> {
    (0..count)
        .map(|n| match base {
            Some(base) => reader.read_packed_u32_delta(base[n]),
            None => Ok(reader.read_bits(word_bits(total_bits, n))? as u32),
        })
        .collect()
}

fn word_bits(total_bits: usize, word: usize) -> usize {
    (total_bits - word * 32).min(32)
}

/// Fixed-width codecs go out raw; variable and fixed-point values as a
/// packed delta from `predicted`.
pub(crate) fn write_field(
    writer: &mut BitWriter,
    codec: FieldCodec,
    word: u32,
    predicted: u32,
) -> BitResult<()> {
    match codec.raw_bits() {
        Some(bits) => writer.write_bits(u64::from(word) & low_mask(bits), bits),
        None => writer.write_packed_u32_delta(word, predicted),
    }
}

pub(crate) fn read_field(
    reader: &mut BitReader<'_>,
    codec: FieldCodec,
    predicted: u32,
) -> BitResult<u32> {
    match codec {
        FieldCodec::SInt { bits } => {
            let bits = usize::from(bits);
            let raw = reader.read_bits(bits)?;
            let shift = 64 - bits;
            Ok((((raw << shift) as i64) >> shift) as u32)
        }
        _ => match codec.raw_bits() {
            Some(bits) => Ok(reader.read_bits(bits)? as u32),
            None => reader.read_packed_u32_delta(predicted),
        },
    }
}

const fn low_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

pub(crate) fn write_baseline_ticks(
    writer: &mut BitWriter,
    tick: SnapshotTick,
    baselines: &[Option<SnapshotTick>; MAX_BASELINES],
) -> BitResult<()> {
    for baseline in baselines {
        writer.write_packed_u32(tick_delta(tick, *baseline))?;
    }
    Ok(())
}

fn tick_delta(tick: SnapshotTick, baseline: Option<SnapshotTick>) -> u32 {
    baseline.map_or(MAX_BASELINE_AGE, |baseline| tick.ticks_since(baseline) as u32)
}

fn baselines_cost(tick: SnapshotTick, baselines: &[Option<SnapshotTick>; MAX_BASELINES]) -> usize {
    baselines
        .iter()
        .map(|baseline| packed_u32_len(tick_delta(tick, *baseline)))
        .sum()
}

fn packed_len(value: usize) -> usize {
    packed_u32_len(value as u32)
}

/// Number of leading entries whose chunk encoding fits in `available` bits.
fn fit_entries(
    entries: &[Entry],
    ghost_type: GhostTypeIndex,
    tick: SnapshotTick,
    available: usize,
    size_prefix: bool,
) -> usize {
    let type_bits = packed_u32_len(ghost_type.raw());
    let mut emitted = 0usize;
    let mut closed_runs = 0usize;
    let mut run: Option<([Option<SnapshotTick>; MAX_BASELINES], usize, usize)> = None;
    let mut entity_bits = 0usize;
    let mut previous_id = 0i32;
    let mut fitted = 0;

    for (n, entry) in entries.iter().enumerate() {
        if !entry.emitted {
            fitted = n + 1;
            continue;
        }
        let (next_closed, next_run) = match run {
            Some((baselines, cost, len)) if baselines == entry.baselines => {
                (closed_runs, (baselines, cost, len + 1))
            }
            Some((_, cost, len)) => (
                closed_runs + cost + packed_len(len),
                (entry.baselines, baselines_cost(tick, &entry.baselines), 1),
            ),
            None => (0, (entry.baselines, baselines_cost(tick, &entry.baselines), 1)),
        };
        let id = entry.ghost.ghost_id.raw();
        let payload = entry.bits.len();
        let mut cost =
            packed_u32_len(bitstream::zigzag_encode(id.wrapping_sub(previous_id))) + payload;
        if entry.baselines[0].is_none() {
            cost += packed_u32_len(tick.ticks_since(entry.ghost.spawn_tick) as u32);
        }
        if size_prefix {
            cost += packed_len(payload);
        }
        let total = type_bits
            + packed_len(emitted + 1)
            + next_closed
            + next_run.1
            + packed_len(next_run.2)
            + entity_bits
            + cost;
        if total > available {
            break;
        }
        emitted += 1;
        closed_runs = next_closed;
        run = Some(next_run);
        entity_bits += cost;
        previous_id = id;
        fitted = n + 1;
    }
    fitted
}

fn write_chunk(
    packet: &mut BitWriter,
    scratch: &BitWriter,
    entries: &[Entry],
    ghost_type: GhostTypeIndex,
    tick: SnapshotTick,
    config: &GhostSendConfig,
) -> BitResult<()> {
    let emitted: Vec<&Entry> = entries.iter().filter(|entry| entry.emitted).collect();
    if emitted.is_empty() {
        return Ok(());
    }
    packet.write_packed_u32(ghost_type.raw())?;
    packet.write_packed_u32(emitted.len() as u32)?;
    let mut previous_id = 0i32;
    let mut start = 0;
    while start < emitted.len() {
        let baselines = emitted[start].baselines;
        let end = emitted[start..]
            .iter()
            .position(|entry| entry.baselines != baselines)
            .map_or(emitted.len(), |n| start + n);
        write_baseline_ticks(packet, tick, &baselines)?;
        packet.write_packed_u32((end - start) as u32)?;
        for entry in &emitted[start..end] {
            let id = entry.ghost.ghost_id.raw();
            packet.write_packed_i32(id.wrapping_sub(previous_id))?;
            previous_id = id;
            if entry.baselines[0].is_none() {
                packet.write_packed_u32(tick.ticks_since(entry.ghost.spawn_tick) as u32)?;
            }
            if config.entity_size_prefix {
                packet.write_packed_u32(entry.bits.len() as u32)?;
            }
            packet.append_bits(scratch, entry.bits.clone())?;
        }
        start = end;
    }
    Ok(())
}
