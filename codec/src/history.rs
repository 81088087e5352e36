//! Per-connection baseline history.
//!
//! Every chunk a connection has been sent owns a ring of
//! [`SNAPSHOT_HISTORY_SIZE`] slots. A slot holds the records written for
//! one tick, the stamp of the entity each record belongs to, and the
//! dynamic storage its buffer components point into. Records are addressed
//! by `(slot, entity position)`; nothing holds references into the ring.
//!
//! A slot is usable as a baseline only once the connection acknowledged
//! its tick. Ack flags are refreshed lazily while looking for baselines.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use schema::{GhostTypeIndex, GhostTypeInfo};
use tracing::debug;

use crate::ack::SnapshotAck;
use crate::config::SNAPSHOT_HISTORY_SIZE;
use crate::error::{SerializeError, SerializeResult};
use crate::record::{read_word, record_tick, write_word};
use crate::types::{ChunkId, EntityStamp, SnapshotTick};
use crate::world::GhostChunk;

/// A history slot picked as a baseline for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub slot: usize,
    /// Tick the record was last actually sent at.
    pub tick: SnapshotTick,
}

/// A baseline copied out of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineData {
    pub tick: SnapshotTick,
    pub record: Vec<u8>,
    /// Flattened element words, one list per buffer component.
    pub buffers: Vec<Vec<u32>>,
}

/// Send bookkeeping for one chunk on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkSendState {
    /// Last tick the chunk was completely sent or skipped.
    pub last_send_tick: Option<SnapshotTick>,
    /// First entity still to send after a partial send.
    pub resume_index: Option<usize>,
    /// No entity was relevant on the last send.
    pub all_irrelevant: bool,
    /// First tick of the current run of sends that emitted nothing.
    pub zero_change_tick: Option<SnapshotTick>,
    /// Chunk change version at `zero_change_tick`.
    pub zero_change_version: u32,
    /// Relevancy version at the last send.
    pub relevancy_version: u64,
}

#[derive(Debug, Clone)]
struct HistorySlot {
    tick: Option<SnapshotTick>,
    records: Vec<u8>,
    stamps: Vec<Option<EntityStamp>>,
    dynamic: Vec<u8>,
}

impl HistorySlot {
    fn new(capacity: usize, record_size: usize) -> Self {
        Self {
            tick: None,
            records: vec![0; capacity * record_size],
            stamps: vec![None; capacity],
            dynamic: Vec::new(),
        }
    }
}

/// The history ring of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkHistory {
    id: ChunkId,
    ghost_type: GhostTypeIndex,
    order_version: u32,
    capacity: usize,
    record_size: usize,
    slots: Vec<HistorySlot>,
    write_index: usize,
    ack_flags: u32,
    pub send: ChunkSendState,
}

impl ChunkHistory {
    fn new(chunk: &GhostChunk, info: &GhostTypeInfo) -> Self {
        let capacity = chunk.storage_capacity();
        Self {
            id: chunk.id,
            ghost_type: chunk.ghost_type,
            order_version: chunk.order_version,
            capacity,
            record_size: info.record_size,
            slots: (0..SNAPSHOT_HISTORY_SIZE)
                .map(|_| HistorySlot::new(capacity, info.record_size))
                .collect(),
            write_index: 0,
            ack_flags: 0,
            send: ChunkSendState::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    #[must_use]
    pub const fn ghost_type(&self) -> GhostTypeIndex {
        self.ghost_type
    }

    #[must_use]
    pub const fn order_version(&self) -> u32 {
        self.order_version
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot the current tick writes to.
    #[must_use]
    pub const fn write_index(&self) -> usize {
        self.write_index
    }

    /// Tick stored in a slot.
    #[must_use]
    pub fn slot_tick(&self, slot: usize) -> Option<SnapshotTick> {
        self.slots[slot].tick
    }

    /// Returns `true` if the slot's tick is known to be acknowledged.
    #[must_use]
    pub const fn is_acked(&self, slot: usize) -> bool {
        self.ack_flags & (1 << slot) != 0
    }

    /// Prepares the slot for `tick` and returns it.
    ///
    /// Calling again for the same tick reuses the slot, so a retried packet
    /// overwrites its own records. Starting a new slot forgets every stamp
    /// it held.
    pub fn begin_write(&mut self, tick: SnapshotTick) -> usize {
        let current = self.slots[self.write_index].tick;
        if current == Some(tick) {
            return self.write_index;
        }
        if current.is_some() {
            self.advance_write_index();
        }
        let slot = &mut self.slots[self.write_index];
        slot.tick = Some(tick);
        slot.stamps.fill(None);
        slot.dynamic.clear();
        self.ack_flags &= !(1 << self.write_index);
        self.write_index
    }

    /// Moves the cursor to the next slot.
    pub fn advance_write_index(&mut self) {
        self.write_index = (self.write_index + 1) % SNAPSHOT_HISTORY_SIZE;
    }

    fn refresh_ack(&mut self, slot: usize, slot_tick: SnapshotTick, ack: &SnapshotAck) {
        let bit = 1 << slot;
        if ack.is_received(slot_tick) {
            self.ack_flags |= bit;
        } else if !ack.has_reached(slot_tick) {
            self.ack_flags &= !bit;
        }
    }

    /// Finds up to `max` acknowledged slots holding `stamp` at `entity`,
    /// newest first.
    ///
    /// Walks backward from the slot before the cursor and stops at the first
    /// slot that is empty or at least `max_age` ticks old. Slots carrying
    /// forward the same record as a newer candidate are passed over.
    pub fn baseline_candidates(
        &mut self,
        entity: usize,
        stamp: EntityStamp,
        ack: &SnapshotAck,
        tick: SnapshotTick,
        max_age: u32,
        max: usize,
    ) -> Vec<Baseline> {
        let mut found: Vec<Baseline> = Vec::with_capacity(max);
        if max == 0 || entity >= self.capacity {
            return found;
        }
        for back in 1..SNAPSHOT_HISTORY_SIZE {
            let slot = (self.write_index + SNAPSHOT_HISTORY_SIZE - back) % SNAPSHOT_HISTORY_SIZE;
            let Some(slot_tick) = self.slots[slot].tick else {
                break;
            };
            let age = tick.ticks_since(slot_tick);
            if age <= 0 || age as u32 >= max_age {
                break;
            }
            self.refresh_ack(slot, slot_tick, ack);
            if !self.is_acked(slot) || self.slots[slot].stamps[entity] != Some(stamp) {
                continue;
            }
            let leading = SnapshotTick::new(record_tick(self.record(slot, entity)));
            if found.last().is_some_and(|b| b.tick == leading) {
                continue;
            }
            found.push(Baseline {
                slot,
                tick: leading,
            });
            if found.len() == max {
                break;
            }
        }
        found
    }

    /// Leading tick of the newest record stored for `stamp` at `entity`,
    /// acknowledged or not.
    #[must_use]
    pub fn latest_record_tick(
        &self,
        entity: usize,
        stamp: EntityStamp,
        tick: SnapshotTick,
        max_age: u32,
    ) -> Option<SnapshotTick> {
        if entity >= self.capacity {
            return None;
        }
        for back in 1..SNAPSHOT_HISTORY_SIZE {
            let slot = (self.write_index + SNAPSHOT_HISTORY_SIZE - back) % SNAPSHOT_HISTORY_SIZE;
            let slot_tick = self.slots[slot].tick?;
            let age = tick.ticks_since(slot_tick);
            if age <= 0 || age as u32 >= max_age {
                return None;
            }
            if self.slots[slot].stamps[entity] == Some(stamp) {
                return Some(SnapshotTick::new(record_tick(self.record(slot, entity))));
            }
        }
        None
    }

    /// Copies a baseline record and its buffer elements out of the ring.
    pub fn load_baseline(
        &self,
        baseline: Baseline,
        entity: usize,
        info: &GhostTypeInfo,
    ) -> SerializeResult<BaselineData> {
        let record = self.record(baseline.slot, entity).to_vec();
        let dynamic = &self.slots[baseline.slot].dynamic;
        let mut buffers = Vec::new();
        for layout in info.components.iter().filter(|c| c.buffer) {
            let len = read_word(&record, layout.offset) as usize;
            let offset = read_word(&record, layout.offset + 4) as usize;
            let needed = offset + len * layout.element_size;
            if needed > dynamic.len() {
                return Err(SerializeError::DynamicBaselineMissing {
                    chunk: self.id,
                    needed,
                    available: dynamic.len(),
                });
            }
            buffers.push(
                dynamic[offset..needed]
                    .chunks_exact(4)
                    .map(|w| read_word(w, 0))
                    .collect(),
            );
        }
        Ok(BaselineData {
            tick: baseline.tick,
            record,
            buffers,
        })
    }

    /// The record of `entity` in `slot`.
    #[must_use]
    pub fn record(&self, slot: usize, entity: usize) -> &[u8] {
        let start = entity * self.record_size;
        &self.slots[slot].records[start..start + self.record_size]
    }

    /// Mutable record of `entity` in `slot`.
    pub fn record_mut(&mut self, slot: usize, entity: usize) -> &mut [u8] {
        let start = entity * self.record_size;
        &mut self.slots[slot].records[start..start + self.record_size]
    }

    /// Stamp of the entity whose record is stored at `entity` in `slot`.
    #[must_use]
    pub fn stamp(&self, slot: usize, entity: usize) -> Option<EntityStamp> {
        self.slots[slot].stamps.get(entity).copied().flatten()
    }

    /// Dynamic storage of a slot.
    #[must_use]
    pub fn dynamic(&self, slot: usize) -> &[u8] {
        &self.slots[slot].dynamic
    }

    /// Makes room for `bytes` more bytes of dynamic storage in `slot`.
    pub fn ensure_dynamic_capacity(&mut self, slot: usize, bytes: usize) -> SerializeResult<()> {
        self.slots[slot]
            .dynamic
            .try_reserve(bytes)
            .map_err(|_| SerializeError::OutOfMemory { bytes })
    }

    /// Stores a record and its buffer elements.
    ///
    /// Buffer headers in the stored record are rewritten to point at the
    /// elements' new place in the slot. Returns the slot's dynamic length
    /// before the write, for rollback.
    pub fn store(
        &mut self,
        slot: usize,
        entity: usize,
        stamp: EntityStamp,
        record: &[u8],
        buffers: &[Vec<u32>],
        info: &GhostTypeInfo,
    ) -> SerializeResult<usize> {
        let prior = self.slots[slot].dynamic.len();
        let bytes: usize = buffers.iter().map(|b| b.len() * 4).sum();
        self.ensure_dynamic_capacity(slot, bytes)?;

        let size = self.record_size;
        let start = entity * size;
        let HistorySlot {
            records,
            stamps,
            dynamic,
            ..
        } = &mut self.slots[slot];
        let target = &mut records[start..start + size];
        target.copy_from_slice(record);
        for (layout, words) in info.components.iter().filter(|c| c.buffer).zip(buffers) {
            write_word(target, layout.offset + 4, dynamic.len() as u32);
            for word in words {
                dynamic.extend_from_slice(&word.to_le_bytes());
            }
        }
        stamps[entity] = Some(stamp);
        Ok(prior)
    }

    /// Forgets the record at `entity` in `slot`.
    pub fn clear_entity(&mut self, slot: usize, entity: usize) {
        if let Some(stamp) = self.slots[slot].stamps.get_mut(entity) {
            *stamp = None;
        }
    }

    /// Drops dynamic storage written after `len`.
    pub fn truncate_dynamic(&mut self, slot: usize, len: usize) {
        self.slots[slot].dynamic.truncate(len);
    }

    /// Forgets every record of the entity at position `entity`.
    pub fn forget_entity(&mut self, entity: usize) {
        for slot in &mut self.slots {
            if let Some(stamp) = slot.stamps.get_mut(entity) {
                *stamp = None;
            }
        }
    }

    fn restructure(&mut self, chunk: &GhostChunk, info: &GhostTypeInfo, migrate: bool) {
        let capacity = chunk.storage_capacity();
        let mut slots: Vec<HistorySlot> = (0..SNAPSHOT_HISTORY_SIZE)
            .map(|_| HistorySlot::new(capacity, self.record_size))
            .collect();

        if migrate {
            let positions: HashMap<EntityStamp, usize> = chunk
                .entities
                .iter()
                .enumerate()
                .map(|(i, e)| (e.stamp, i))
                .collect();
            for (old, new) in self.slots.iter().zip(slots.iter_mut()) {
                new.tick = old.tick;
                for (from, stamp) in old.stamps.iter().enumerate() {
                    let Some(stamp) = stamp else { continue };
                    let Some(&to) = positions.get(stamp) else {
                        continue;
                    };
                    let src = from * self.record_size;
                    let dst = to * self.record_size;
                    new.records[dst..dst + self.record_size]
                        .copy_from_slice(&old.records[src..src + self.record_size]);
                    new.stamps[to] = Some(*stamp);
                }
            }
        } else {
            self.ack_flags = 0;
            self.write_index = 0;
        }

        debug!(
            chunk = self.id.0,
            ghost_type = info.index.raw(),
            migrated = migrate,
            old_capacity = self.capacity,
            new_capacity = capacity,
            "chunk structure changed, history rebuilt"
        );

        self.slots = slots;
        self.capacity = capacity;
        self.order_version = chunk.order_version;
        self.send.resume_index = None;
        self.send.zero_change_tick = None;
    }
}

/// Every chunk history of one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHistory {
    chunks: HashMap<ChunkId, ChunkHistory>,
    /// First tick a never-sent chunk was eligible for sending.
    waiting: HashMap<ChunkId, SnapshotTick>,
}

impl ConnectionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the history of `chunk`, creating it on first use.
    ///
    /// The flag is `true` when the chunk's structure changed since the last
    /// call: its history was migrated by entity identity (if `keep_history`
    /// and the type has no buffers) or reset.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::GhostTypeChanged`] if the chunk id now
    /// carries a different ghost type.
    pub fn get_or_create(
        &mut self,
        chunk: &GhostChunk,
        info: &GhostTypeInfo,
        keep_history: bool,
    ) -> SerializeResult<(&mut ChunkHistory, bool)> {
        match self.chunks.entry(chunk.id) {
            Entry::Occupied(entry) => {
                let history = entry.into_mut();
                if history.ghost_type != chunk.ghost_type {
                    return Err(SerializeError::GhostTypeChanged {
                        chunk: chunk.id,
                        expected: history.ghost_type,
                        found: chunk.ghost_type,
                    });
                }
                let structural = history.order_version != chunk.order_version
                    || history.capacity != chunk.storage_capacity();
                if structural {
                    history.restructure(chunk, info, keep_history && !info.has_buffers);
                }
                Ok((history, structural))
            }
            Entry::Vacant(entry) => Ok((entry.insert(ChunkHistory::new(chunk, info)), false)),
        }
    }

    #[must_use]
    pub fn get(&self, chunk: ChunkId) -> Option<&ChunkHistory> {
        self.chunks.get(&chunk)
    }

    pub fn get_mut(&mut self, chunk: ChunkId) -> Option<&mut ChunkHistory> {
        self.chunks.get_mut(&chunk)
    }

    /// Drops histories of chunks not in `live`.
    pub fn remove_stale(&mut self, live: impl IntoIterator<Item = ChunkId>) {
        let live: HashSet<ChunkId> = live.into_iter().collect();
        self.chunks.retain(|id, _| live.contains(id));
        self.waiting.retain(|id, _| live.contains(id));
    }

    /// Remembers the first tick `chunk` waited to be sent. Does nothing once
    /// the chunk has been sent.
    pub fn note_waiting(&mut self, chunk: ChunkId, tick: SnapshotTick) {
        let sent = self
            .chunks
            .get(&chunk)
            .is_some_and(|history| history.send.last_send_tick.is_some());
        if sent {
            self.waiting.remove(&chunk);
        } else {
            self.waiting.entry(chunk).or_insert(tick);
        }
    }

    /// The tick a never-sent chunk started waiting.
    #[must_use]
    pub fn waiting_since(&self, chunk: ChunkId) -> Option<SnapshotTick> {
        self.waiting.get(&chunk).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GhostId, SpawnedGhost};
    use crate::world::{ComponentState, FieldValue, GhostEntity};
    use schema::{
        ComponentDef, ComponentId, FieldCodec, FieldDef, FieldId, GhostComponentDef,
        GhostTypeDef, GhostTypeId, TypeRegistry,
    };

    fn registry(buffers: bool) -> TypeRegistry {
        let value = ComponentDef::new(ComponentId::new(1).unwrap(), "Value")
            .field(FieldDef::new(FieldId::new(1).unwrap(), FieldCodec::var_uint()));
        let mut def = GhostTypeDef::new(GhostTypeId::new(1))
            .component(GhostComponentDef::root(value.clone()));
        if buffers {
            def = def.component(GhostComponentDef::root(
                ComponentDef::new(ComponentId::new(2).unwrap(), "List")
                    .field(FieldDef::new(FieldId::new(1).unwrap(), FieldCodec::var_uint())),
            )
            .buffer());
        }
        let mut registry = TypeRegistry::new();
        registry.register(def).unwrap();
        registry
    }

    fn entity(index: u32) -> GhostEntity {
        GhostEntity::new(
            EntityStamp::new(index, 0),
            SpawnedGhost::new(GhostId::new(index as i32).unwrap(), SnapshotTick::new(1)),
            vec![ComponentState::fields(vec![FieldValue::VarUInt(index.into())])],
        )
    }

    fn chunk(entities: Vec<GhostEntity>) -> GhostChunk {
        GhostChunk {
            entities,
            ..GhostChunk::new(ChunkId(1), GhostTypeIndex::new(0), 4)
        }
    }

    fn write(
        history: &mut ChunkHistory,
        info: &GhostTypeInfo,
        tick: u32,
        entity: usize,
        stamp: EntityStamp,
    ) {
        let slot = history.begin_write(SnapshotTick::new(tick));
        let mut record = vec![0u8; info.record_size];
        write_word(&mut record, 0, tick);
        history.store(slot, entity, stamp, &record, &[], info).unwrap();
    }

    fn acked(ticks: &[u32]) -> SnapshotAck {
        let mut ack = SnapshotAck::new();
        for &t in ticks {
            ack.record(SnapshotTick::new(t));
        }
        ack
    }

    #[test]
    fn only_acked_slots_are_candidates() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let stamp = EntityStamp::new(1, 0);
        for tick in 1..=4 {
            write(history, info, tick, 0, stamp);
        }
        history.begin_write(SnapshotTick::new(5));
        let ack = acked(&[1, 3]);
        let found = history.baseline_candidates(0, stamp, &ack, SnapshotTick::new(5), 1 << 28, 3);
        let ticks: Vec<u32> = found.iter().map(|b| b.tick.raw()).collect();
        assert_eq!(ticks, vec![3, 1]);
    }

    #[test]
    fn stamp_mismatch_is_not_a_candidate() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        write(history, info, 1, 0, EntityStamp::new(1, 0));
        history.begin_write(SnapshotTick::new(2));
        let found = history.baseline_candidates(
            0,
            EntityStamp::new(1, 1),
            &acked(&[1]),
            SnapshotTick::new(2),
            1 << 28,
            3,
        );
        assert!(found.is_empty());
    }

    #[test]
    fn old_slots_age_out() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let stamp = EntityStamp::new(1, 0);
        write(history, info, 10, 0, stamp);
        history.begin_write(SnapshotTick::new(20));
        let ack = acked(&[10]);
        assert_eq!(
            history
                .baseline_candidates(0, stamp, &ack, SnapshotTick::new(20), 10, 3)
                .len(),
            0
        );
        assert_eq!(
            history
                .baseline_candidates(0, stamp, &ack, SnapshotTick::new(20), 11, 3)
                .len(),
            1
        );
    }

    #[test]
    fn acked_slot_stays_usable_after_leaving_ack_window() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let stamp = EntityStamp::new(1, 0);
        write(history, info, 10, 0, stamp);
        history.begin_write(SnapshotTick::new(11));
        let mut ack = acked(&[10]);
        assert_eq!(
            history
                .baseline_candidates(0, stamp, &ack, SnapshotTick::new(11), 1 << 28, 3)
                .len(),
            1
        );
        ack.record(SnapshotTick::new(400));
        assert_eq!(
            history
                .baseline_candidates(0, stamp, &ack, SnapshotTick::new(401), 1 << 28, 3)
                .len(),
            1
        );
    }

    #[test]
    fn same_tick_reuses_slot() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let a = history.begin_write(SnapshotTick::new(3));
        let b = history.begin_write(SnapshotTick::new(3));
        let c = history.begin_write(SnapshotTick::new(4));
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn new_slot_clears_stamps() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let stamp = EntityStamp::new(1, 0);
        for tick in 0..SNAPSHOT_HISTORY_SIZE as u32 {
            write(history, info, tick + 1, 0, stamp);
        }
        let slot = history.begin_write(SnapshotTick::new(100));
        assert_eq!(history.stamp(slot, 0), None);
    }

    #[test]
    fn ghost_type_change_is_fatal() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let mut c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        store.get_or_create(&c, info, true).unwrap();
        c.ghost_type = GhostTypeIndex::new(3);
        assert!(matches!(
            store.get_or_create(&c, info, true),
            Err(SerializeError::GhostTypeChanged { .. })
        ));
    }

    #[test]
    fn reorder_migrates_by_stamp() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let mut c = chunk(vec![entity(1), entity(2)]);
        let mut store = ConnectionHistory::new();
        {
            let (history, structural) = store.get_or_create(&c, info, true).unwrap();
            assert!(!structural);
            write(history, info, 1, 1, EntityStamp::new(2, 0));
        }
        c.entities.swap(0, 1);
        c.order_version += 1;
        let (history, structural) = store.get_or_create(&c, info, true).unwrap();
        assert!(structural);
        history.begin_write(SnapshotTick::new(2));
        let found = history.baseline_candidates(
            0,
            EntityStamp::new(2, 0),
            &acked(&[1]),
            SnapshotTick::new(2),
            1 << 28,
            3,
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn reorder_with_buffers_resets() {
        let registry = registry(true);
        let info = registry.info(GhostTypeIndex::new(0));
        let mut c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        {
            let (history, _) = store.get_or_create(&c, info, true).unwrap();
            let slot = history.begin_write(SnapshotTick::new(1));
            let record = vec![0u8; info.record_size];
            history
                .store(slot, 0, EntityStamp::new(1, 0), &record, &[vec![]], info)
                .unwrap();
        }
        c.order_version += 1;
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        assert!((0..SNAPSHOT_HISTORY_SIZE).all(|slot| history.stamp(slot, 0).is_none()));
    }

    #[test]
    fn buffers_round_trip_through_dynamic_storage() {
        let registry = registry(true);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        let slot = history.begin_write(SnapshotTick::new(1));
        let mut record = vec![0u8; info.record_size];
        write_word(&mut record, 0, 1);
        write_word(&mut record, info.components[1].offset, 3);
        let prior = history
            .store(slot, 0, EntityStamp::new(1, 0), &record, &[vec![4, 5, 6]], info)
            .unwrap();
        assert_eq!(prior, 0);
        assert_eq!(history.dynamic(slot).len(), 12);
        let data = history
            .load_baseline(
                Baseline {
                    slot,
                    tick: SnapshotTick::new(1),
                },
                0,
                info,
            )
            .unwrap();
        assert_eq!(data.buffers, vec![vec![4, 5, 6]]);
        history.truncate_dynamic(slot, prior);
        assert!(matches!(
            history.load_baseline(
                Baseline {
                    slot,
                    tick: SnapshotTick::new(1)
                },
                0,
                info
            ),
            Err(SerializeError::DynamicBaselineMissing { needed: 12, .. })
        ));
    }

    #[test]
    fn remove_stale_drops_dead_chunks() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let mut store = ConnectionHistory::new();
        store.get_or_create(&chunk(vec![entity(1)]), info, true).unwrap();
        assert_eq!(store.len(), 1);
        store.remove_stale([ChunkId(9)]);
        assert!(store.is_empty());
    }

    #[test]
    fn waiting_tick_sticks_until_first_send() {
        let registry = registry(false);
        let info = registry.info(GhostTypeIndex::new(0));
        let c = chunk(vec![entity(1)]);
        let mut store = ConnectionHistory::new();
        store.note_waiting(c.id, SnapshotTick::new(3));
        store.note_waiting(c.id, SnapshotTick::new(5));
        assert_eq!(store.waiting_since(c.id), Some(SnapshotTick::new(3)));

        let (history, _) = store.get_or_create(&c, info, true).unwrap();
        history.send.last_send_tick = Some(SnapshotTick::new(6));
        store.note_waiting(c.id, SnapshotTick::new(7));
        assert_eq!(store.waiting_since(c.id), None);

        store.note_waiting(ChunkId(2), SnapshotTick::new(7));
        store.remove_stale([c.id]);
        assert_eq!(store.waiting_since(ChunkId(2)), None);
    }
}
