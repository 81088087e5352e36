//! Undo log for speculative history writes.

use crate::history::{ChunkSendState, ConnectionHistory};
use crate::types::ChunkId;

/// One undoable history mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOp {
    /// A record was stored; forget it and drop its dynamic bytes.
    ClearEntity {
        chunk: ChunkId,
        slot: usize,
        entity: usize,
        dynamic_len: usize,
    },
    /// Chunk send bookkeeping changed; restore the previous state.
    RestoreChunk { chunk: ChunkId, state: ChunkSendState },
}

/// Position in a [`RollbackLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RollbackMark(usize);

/// Ordered log of history mutations made while building a packet.
///
/// Rolling back applies the inverse operations newest first, so any prefix
/// of the packet can be kept and the rest undone.
#[derive(Debug, Clone, Default)]
pub struct RollbackLog {
    ops: Vec<RollbackOp>,
}

impl RollbackLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position.
    #[must_use]
    pub fn mark(&self) -> RollbackMark {
        RollbackMark(self.ops.len())
    }

    /// Records a mutation.
    pub fn push(&mut self, op: RollbackOp) {
        self.ops.push(op);
    }

    /// Undoes every mutation recorded after `mark`.
    pub fn rollback_to(&mut self, mark: RollbackMark, history: &mut ConnectionHistory) {
        while self.ops.len() > mark.0 {
            let Some(op) = self.ops.pop() else { break };
            match op {
                RollbackOp::ClearEntity {
                    chunk,
                    slot,
                    entity,
                    dynamic_len,
                } => {
                    if let Some(h) = history.get_mut(chunk) {
                        h.clear_entity(slot, entity);
                        h.truncate_dynamic(slot, dynamic_len);
                    }
                }
                RollbackOp::RestoreChunk { chunk, state } => {
                    if let Some(h) = history.get_mut(chunk) {
                        h.send = state;
                    }
                }
            }
        }
    }

    /// Keeps every recorded mutation.
    pub fn commit(&mut self) {
        self.ops.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityStamp, GhostId, SnapshotTick, SpawnedGhost};
    use crate::world::{ComponentState, FieldValue, GhostChunk, GhostEntity};
    use schema::{
        ComponentDef, ComponentId, FieldCodec, FieldDef, FieldId, GhostComponentDef,
        GhostTypeDef, GhostTypeId, GhostTypeIndex, TypeRegistry,
    };

    #[test]
    fn rollback_undoes_newest_first() {
        let mut registry = TypeRegistry::new();
        let index = registry
            .register(GhostTypeDef::new(GhostTypeId::new(1)).component(
                GhostComponentDef::root(
                    ComponentDef::new(ComponentId::new(1).unwrap(), "Value")
                        .field(FieldDef::new(FieldId::new(1).unwrap(), FieldCodec::var_uint())),
                ),
            ))
            .unwrap();
        let info = registry.info(index);
        let stamp = EntityStamp::new(1, 0);
        let chunk = GhostChunk {
            entities: vec![GhostEntity::new(
                stamp,
                SpawnedGhost::new(GhostId::new(1).unwrap(), SnapshotTick::new(0)),
                vec![ComponentState::fields(vec![FieldValue::VarUInt(1)])],
            )],
            ..GhostChunk::new(ChunkId(7), GhostTypeIndex::new(0), 1)
        };

        let mut history = ConnectionHistory::new();
        let mut log = RollbackLog::new();
        let (h, _) = history.get_or_create(&chunk, info, true).unwrap();
        let slot = h.begin_write(SnapshotTick::new(1));

        let mark = log.mark();
        let record = vec![0u8; info.record_size];
        let dynamic_len = h.store(slot, 0, stamp, &record, &[], info).unwrap();
        log.push(RollbackOp::ClearEntity {
            chunk: chunk.id,
            slot,
            entity: 0,
            dynamic_len,
        });
        log.push(RollbackOp::RestoreChunk {
            chunk: chunk.id,
            state: h.send,
        });
        h.send.last_send_tick = Some(SnapshotTick::new(1));

        log.rollback_to(mark, &mut history);
        let h = history.get(chunk.id).unwrap();
        assert_eq!(h.stamp(slot, 0), None);
        assert_eq!(h.send.last_send_tick, None);
        assert!(log.is_empty());
    }

    #[test]
    fn commit_forgets_ops() {
        let mut log = RollbackLog::new();
        log.push(RollbackOp::RestoreChunk {
            chunk: ChunkId(1),
            state: ChunkSendState::default(),
        });
        assert_eq!(log.len(), 1);
        log.commit();
        assert!(log.is_empty());
    }
}
