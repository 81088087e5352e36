//! Chunk scoring and per-tick budgets.

use codec::{ChunkId, ConnectionState, GhostSendConfig, GhostWorld, SnapshotTick};
use schema::{GhostTypeIndex, TypeRegistry};
use tracing::trace;

use crate::scaling::ImportanceScaler;

/// A chunk queued for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioChunk {
    /// Position of the chunk in the world's chunk list.
    pub chunk_index: usize,
    pub chunk: ChunkId,
    /// Entity to resume from after a partial send.
    pub start_index: usize,
    pub ghost_type: GhostTypeIndex,
    pub priority: u32,
    /// Entities in the chunk.
    pub entities: usize,
}

/// Ranks every sendable chunk for one connection, highest priority first.
///
/// The score is the type's importance times the ticks since the chunk was
/// last sent. A never-sent chunk has age 1 on the first tick it waits and
/// ages from there, so budgets cannot starve it. A chunk that was entirely
/// irrelevant on its last send is scaled down. Chunks of group members, of
/// types the connection has not acknowledged and empty chunks are never
/// listed.
pub fn prioritize(
    world: &GhostWorld,
    conn: &ConnectionState,
    registry: &TypeRegistry,
    config: &GhostSendConfig,
    tick: SnapshotTick,
    scaler: Option<&dyn ImportanceScaler>,
) -> Vec<PrioChunk> {
    let mut prios = Vec::with_capacity(world.chunks().len());
    for (chunk_index, chunk) in world.chunks().iter().enumerate() {
        if chunk.is_empty() || chunk.group_member || !conn.types.is_announced(chunk.ghost_type) {
            continue;
        }
        let Some(info) = registry.get(chunk.ghost_type) else {
            continue;
        };
        let state = conn
            .history
            .get(chunk.id)
            .map(|history| history.send)
            .unwrap_or_default();
        let age = match (state.last_send_tick, conn.history.waiting_since(chunk.id)) {
            (Some(last), _) => tick.ticks_since(last),
            (None, Some(since)) => tick.ticks_since(since) + 1,
            (None, None) => 1,
        }
        .max(1) as u32;
        let mut priority = info.importance.saturating_mul(age);
        if state.all_irrelevant {
            priority /= config.irrelevant_importance_downscale.max(1);
        }
        if priority < config.min_send_importance {
            continue;
        }
        if let Some(scaler) = scaler {
            priority = scaler.scale(conn.network_id(), chunk, priority);
            if priority < config.min_distance_scaled_importance {
                continue;
            }
        }
        prios.push(PrioChunk {
            chunk_index,
            chunk: chunk.id,
            start_index: state.resume_index.unwrap_or(0),
            ghost_type: chunk.ghost_type,
            priority,
            entities: chunk.len(),
        });
    }
    prios.sort_by(|a, b| b.priority.cmp(&a.priority));
    trace!(
        connection = conn.network_id().0,
        chunks = prios.len(),
        "chunks prioritized"
    );
    prios
}

/// Applies the per-tick chunk and entity caps. Zero means unlimited.
///
/// A chunk that would push the entity total past `max_entities` ends the
/// list, except for the first chunk, which always goes.
pub fn select_within_budget(
    mut prios: Vec<PrioChunk>,
    max_chunks: usize,
    max_entities: usize,
) -> Vec<PrioChunk> {
    if max_chunks > 0 {
        prios.truncate(max_chunks);
    }
    if max_entities == 0 {
        return prios;
    }
    let mut total = 0usize;
    let mut keep = 0;
    for prio in &prios {
        total += prio.entities;
        if total > max_entities && keep > 0 {
            break;
        }
        keep += 1;
    }
    prios.truncate(keep);
    prios
}
