//! World input handed to the sender every tick.
//!
//! The game owns its entity storage. Each tick it describes the replicated
//! part of it as a list of [`GhostChunk`]s; the sender only reads them.

use std::collections::HashMap;

use schema::GhostTypeIndex;
use tracing::warn;

use crate::types::{ChunkId, EntityStamp, GhostId, SpawnedGhost};

/// A field value as the game provides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    UInt(u64),
    SInt(i64),
    VarUInt(u64),
    VarSInt(i64),
    /// Already quantized.
    FixedPoint(i64),
}

impl FieldValue {
    /// Short name used in diagnostics.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::UInt(_) => "uint",
            Self::SInt(_) => "sint",
            Self::VarUInt(_) => "varuint",
            Self::VarSInt(_) => "varsint",
            Self::FixedPoint(_) => "fixed-point",
        }
    }
}

/// The value of one component on one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentValue {
    /// One value per field, in definition order.
    Fields(Vec<FieldValue>),
    /// A list of elements, each with one value per field.
    Buffer(Vec<Vec<FieldValue>>),
}

/// A component value plus its enable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentState {
    pub enabled: bool,
    pub value: ComponentValue,
}

impl ComponentState {
    /// An enabled plain component.
    #[must_use]
    pub fn fields(values: Vec<FieldValue>) -> Self {
        Self {
            enabled: true,
            value: ComponentValue::Fields(values),
        }
    }

    /// An enabled buffer component.
    #[must_use]
    pub fn buffer(elements: Vec<Vec<FieldValue>>) -> Self {
        Self {
            enabled: true,
            value: ComponentValue::Buffer(elements),
        }
    }

    /// Sets the enable state.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Components of one child entity of a ghost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEntity {
    pub stamp: EntityStamp,
    /// Components with this entity index, in registry order.
    pub components: Vec<ComponentState>,
}

/// One replicated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostEntity {
    pub stamp: EntityStamp,
    /// `None` until the entity has been assigned a ghost id.
    pub ghost: Option<SpawnedGhost>,
    /// Root components, in registry order.
    pub components: Vec<ComponentState>,
    /// Child entities; `children[n - 1]` holds entity index `n`.
    pub children: Vec<LinkedEntity>,
    /// Group members, for group roots.
    pub group: Vec<EntityStamp>,
}

impl GhostEntity {
    /// Creates an entity with root components only.
    #[must_use]
    pub fn new(stamp: EntityStamp, ghost: SpawnedGhost, components: Vec<ComponentState>) -> Self {
        Self {
            stamp,
            ghost: Some(ghost),
            components,
            children: Vec::new(),
            group: Vec::new(),
        }
    }

    /// Adds a child entity.
    #[must_use]
    pub fn child(mut self, child: LinkedEntity) -> Self {
        self.children.push(child);
        self
    }

    /// Adds a group member.
    #[must_use]
    pub fn member(mut self, member: EntityStamp) -> Self {
        self.group.push(member);
        self
    }

    /// Ghost id, if assigned.
    #[must_use]
    pub fn ghost_id(&self) -> Option<GhostId> {
        self.ghost.map(|g| g.ghost_id)
    }
}

/// A homogeneous batch of entities of one ghost type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostChunk {
    pub id: ChunkId,
    pub ghost_type: GhostTypeIndex,
    /// Bumped whenever entities are added, removed or reordered.
    pub order_version: u32,
    /// Bumped whenever any replicated component is written.
    pub change_version: u32,
    pub capacity: usize,
    /// Entities of this chunk are only sent as members of a group root.
    pub group_member: bool,
    pub entities: Vec<GhostEntity>,
}

impl GhostChunk {
    /// Creates an empty chunk.
    #[must_use]
    pub fn new(id: ChunkId, ghost_type: GhostTypeIndex, capacity: usize) -> Self {
        Self {
            id,
            ghost_type,
            order_version: 1,
            change_version: 1,
            capacity,
            group_member: false,
            entities: Vec::new(),
        }
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the chunk holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Capacity used for history storage.
    #[must_use]
    pub fn storage_capacity(&self) -> usize {
        self.capacity.max(self.entities.len())
    }
}

/// Position of an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityLocation {
    pub chunk: usize,
    pub entity: usize,
}

/// The replicated world for one tick.
#[derive(Debug, Clone, Default)]
pub struct GhostWorld {
    chunks: Vec<GhostChunk>,
    by_stamp: HashMap<EntityStamp, EntityLocation>,
    by_ghost: HashMap<GhostId, EntityStamp>,
}

impl GhostWorld {
    /// Builds a world and its lookup indices.
    #[must_use]
    pub fn new(chunks: Vec<GhostChunk>) -> Self {
        let mut world = Self {
            chunks,
            by_stamp: HashMap::new(),
            by_ghost: HashMap::new(),
        };
        world.reindex();
        world
    }

    /// Rebuilds the lookup indices after the chunks were edited.
    ///
    /// Two live entities claiming one ghost id is logged and the later one
    /// wins; the client recovers through a respawn.
    pub fn reindex(&mut self) {
        self.by_stamp.clear();
        self.by_ghost.clear();
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            for (entity_index, entity) in chunk.entities.iter().enumerate() {
                self.by_stamp.insert(
                    entity.stamp,
                    EntityLocation {
                        chunk: chunk_index,
                        entity: entity_index,
                    },
                );
                if let Some(ghost) = entity.ghost {
                    if let Some(previous) = self.by_ghost.insert(ghost.ghost_id, entity.stamp) {
                        if previous != entity.stamp {
                            warn!(
                                ghost_id = ghost.ghost_id.raw(),
                                previous = previous.index,
                                current = entity.stamp.index,
                                "ghost id claimed by two entities, overwriting"
                            );
                        }
                    }
                }
            }
        }
    }

    /// All chunks.
    #[must_use]
    pub fn chunks(&self) -> &[GhostChunk] {
        &self.chunks
    }

    /// Mutable access to the chunks. Call [`reindex`](Self::reindex) after
    /// adding, removing or moving entities.
    pub fn chunks_mut(&mut self) -> &mut Vec<GhostChunk> {
        &mut self.chunks
    }

    /// Returns a chunk by position.
    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<&GhostChunk> {
        self.chunks.get(index)
    }

    /// Locates an entity by stamp.
    #[must_use]
    pub fn locate(&self, stamp: EntityStamp) -> Option<EntityLocation> {
        self.by_stamp.get(&stamp).copied()
    }

    /// Returns an entity by stamp.
    #[must_use]
    pub fn entity(&self, stamp: EntityStamp) -> Option<&GhostEntity> {
        let location = self.locate(stamp)?;
        self.chunks
            .get(location.chunk)?
            .entities
            .get(location.entity)
    }

    /// Returns the entity currently holding a ghost id.
    #[must_use]
    pub fn entity_by_ghost(&self, ghost_id: GhostId) -> Option<&GhostEntity> {
        self.entity(*self.by_ghost.get(&ghost_id)?)
    }

    /// Number of entities across all chunks.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(GhostChunk::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotTick;

    fn ghost(id: i32) -> SpawnedGhost {
        SpawnedGhost::new(GhostId::new(id).unwrap(), SnapshotTick::new(1))
    }

    fn entity(index: u32, id: i32) -> GhostEntity {
        GhostEntity::new(
            EntityStamp::new(index, 0),
            ghost(id),
            vec![ComponentState::fields(vec![FieldValue::UInt(index.into())])],
        )
    }

    fn chunk(id: u64, entities: Vec<GhostEntity>) -> GhostChunk {
        GhostChunk {
            entities,
            ..GhostChunk::new(ChunkId(id), GhostTypeIndex::new(0), 4)
        }
    }

    #[test]
    fn index_locates_entities() {
        let world = GhostWorld::new(vec![
            chunk(1, vec![entity(1, 10), entity(2, 11)]),
            chunk(2, vec![entity(3, 12)]),
        ]);
        assert_eq!(
            world.locate(EntityStamp::new(3, 0)),
            Some(EntityLocation {
                chunk: 1,
                entity: 0
            })
        );
        assert_eq!(
            world.entity_by_ghost(GhostId::new(11).unwrap()).unwrap().stamp,
            EntityStamp::new(2, 0)
        );
        assert_eq!(world.entity_count(), 3);
        assert!(world.locate(EntityStamp::new(9, 0)).is_none());
    }

    #[test]
    fn ghost_id_collision_keeps_later_entity() {
        let world = GhostWorld::new(vec![chunk(1, vec![entity(1, 10), entity(2, 10)])]);
        assert_eq!(
            world.entity_by_ghost(GhostId::new(10).unwrap()).unwrap().stamp,
            EntityStamp::new(2, 0)
        );
    }

    #[test]
    fn reindex_after_edit() {
        let mut world = GhostWorld::new(vec![chunk(1, vec![entity(1, 10)])]);
        world.chunks_mut()[0].entities.push(entity(2, 11));
        world.reindex();
        assert!(world.locate(EntityStamp::new(2, 0)).is_some());
    }

    #[test]
    fn storage_capacity_covers_entities() {
        let mut c = chunk(1, vec![entity(1, 10), entity(2, 11)]);
        c.capacity = 1;
        assert_eq!(c.storage_capacity(), 2);
    }
}
