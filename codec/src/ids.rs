//! Ghost id allocation and recycling.
//!
//! Only touched by the single-threaded pre-pass of a tick. A despawned id
//! is recycled once no connection still has its removal pending, or once
//! the grace period ran out.

use std::collections::VecDeque;

use tracing::debug;

use crate::types::{GhostId, SnapshotTick, SpawnedGhost};

const FIRST_ID: GhostId = match GhostId::new(1) {
    Some(id) => id,
    None => panic!("ghost id 1 is valid"),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Despawning {
    ghost: SpawnedGhost,
    since: SnapshotTick,
}

/// Global ghost id allocator.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_id: GhostId,
    next_prespawn_id: i32,
    free: VecDeque<GhostId>,
    despawning: Vec<Despawning>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: FIRST_ID,
            next_prespawn_id: -1,
            free: VecDeque::new(),
            despawning: Vec::new(),
        }
    }

    /// Allocates an id for a ghost spawned at `tick`, reusing freed ids
    /// first.
    pub fn allocate(&mut self, tick: SnapshotTick) -> SpawnedGhost {
        let id = match self.free.pop_front() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = GhostId::new(id.raw().wrapping_add(1).max(1)).unwrap_or(id);
                id
            }
        };
        SpawnedGhost::new(id, tick)
    }

    /// Allocates a negative id for a ghost the client spawned ahead of the
    /// server. Prespawn ids are never recycled.
    pub fn allocate_prespawn(&mut self, tick: SnapshotTick) -> Option<SpawnedGhost> {
        let id = GhostId::new(self.next_prespawn_id)?;
        self.next_prespawn_id = self.next_prespawn_id.checked_sub(1)?;
        Some(SpawnedGhost::new(id, tick))
    }

    /// Starts tracking a despawned ghost.
    pub fn begin_despawn(&mut self, ghost: SpawnedGhost, tick: SnapshotTick) {
        self.despawning.push(Despawning { ghost, since: tick });
    }

    /// Frees ids whose removal no connection still has pending, or whose
    /// grace period elapsed. Returns the freed ids so connections can purge
    /// what they still hold about them.
    pub fn release_acked(
        &mut self,
        tick: SnapshotTick,
        grace_ticks: u32,
        is_pending_anywhere: impl Fn(GhostId) -> bool,
    ) -> Vec<GhostId> {
        let mut released = Vec::new();
        self.despawning.retain(|entry| {
            let id = entry.ghost.ghost_id;
            let expired = tick.ticks_since(entry.since) >= grace_ticks as i32;
            if expired || !is_pending_anywhere(id) {
                released.push(id);
                false
            } else {
                true
            }
        });
        for &id in &released {
            if !id.is_prespawned() {
                self.free.push_back(id);
            }
        }
        if !released.is_empty() {
            debug!(count = released.len(), free = self.free.len(), "recycled ghost ids");
        }
        released
    }

    /// Ids waiting for despawn acknowledgement.
    #[must_use]
    pub fn despawning_len(&self) -> usize {
        self.despawning.len()
    }

    /// Ids ready for reuse.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequentially() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate(SnapshotTick::new(1));
        let b = ids.allocate(SnapshotTick::new(1));
        assert_eq!(a.ghost_id.raw(), 1);
        assert_eq!(b.ghost_id.raw(), 2);
    }

    #[test]
    fn pending_ids_are_not_reused() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate(SnapshotTick::new(1));
        ids.begin_despawn(a, SnapshotTick::new(5));
        let released = ids.release_acked(SnapshotTick::new(6), 100, |_| true);
        assert!(released.is_empty());
        assert_eq!(ids.allocate(SnapshotTick::new(6)).ghost_id.raw(), 2);
    }

    #[test]
    fn acked_ids_are_reused_first() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate(SnapshotTick::new(1));
        ids.allocate(SnapshotTick::new(1));
        ids.begin_despawn(a, SnapshotTick::new(5));
        let released = ids.release_acked(SnapshotTick::new(6), 100, |_| false);
        assert_eq!(released, vec![a.ghost_id]);
        let reused = ids.allocate(SnapshotTick::new(7));
        assert_eq!(reused.ghost_id, a.ghost_id);
        assert_ne!(reused, a);
    }

    #[test]
    fn grace_period_forces_release() {
        let mut ids = IdAllocator::new();
        let a = ids.allocate(SnapshotTick::new(1));
        ids.begin_despawn(a, SnapshotTick::new(5));
        assert!(ids.release_acked(SnapshotTick::new(8), 4, |_| true).is_empty());
        assert_eq!(ids.release_acked(SnapshotTick::new(9), 4, |_| true).len(), 1);
        assert_eq!(ids.despawning_len(), 0);
        assert_eq!(ids.free_len(), 1);
    }

    #[test]
    fn prespawn_ids_are_negative_and_not_recycled() {
        let mut ids = IdAllocator::new();
        let p = ids.allocate_prespawn(SnapshotTick::new(1)).unwrap();
        assert!(p.ghost_id.is_prespawned());
        ids.begin_despawn(p, SnapshotTick::new(2));
        assert_eq!(ids.release_acked(SnapshotTick::new(3), 10, |_| false).len(), 1);
        assert_eq!(ids.free_len(), 0);
    }
}
