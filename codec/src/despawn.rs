//! Despawn and relevancy lifecycle per connection.
//!
//! The tracker knows which ghosts the client may currently hold and which
//! removals it still has to be told about. A removal is written on the tick
//! it is first collected and repeated while it is younger than the repeat
//! window. It is dropped once the client acknowledged any tick it was sent
//! on. If the client acknowledged a later tick but none of the ticks it was
//! sent on, the notice was lost and it is sent again.
//!
//! Every mutation is journaled so a packet that is abandoned can undo what
//! it changed.

use std::collections::{BTreeMap, HashMap};

use schema::GhostTypeIndex;

use crate::ack::SnapshotAck;
use crate::error::{SerializeError, SerializeResult};
use crate::types::{ChunkId, GhostId, SnapshotTick, SpawnedGhost};

/// Why a ghost is leaving the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DespawnKind {
    /// Destroyed on the server.
    Destroyed,
    /// Alive on the server but no longer relevant to this connection.
    Irrelevant,
}

/// A removal the client still has to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDespawn {
    pub ghost: SpawnedGhost,
    pub kind: DespawnKind,
    /// `None` until the notice is first written.
    pub first_sent: Option<SnapshotTick>,
    pub last_sent: SnapshotTick,
}

/// A ghost the client may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownGhost {
    pub ghost: SpawnedGhost,
    pub ghost_type: GhostTypeIndex,
}

#[derive(Debug, Clone)]
enum JournalOp {
    Pending(GhostId, Option<PendingDespawn>),
    Known(GhostId, Option<KnownGhost>),
}

/// Position in the tracker's journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DespawnCheckpoint(usize);

/// Per-connection despawn bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct DespawnTracker {
    pending: BTreeMap<GhostId, PendingDespawn>,
    known: HashMap<GhostId, KnownGhost>,
    journal: Vec<JournalOp>,
}

impl DespawnTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_pending(&mut self, id: GhostId, value: Option<PendingDespawn>) {
        let prior = match value {
            Some(entry) => self.pending.insert(id, entry),
            None => self.pending.remove(&id),
        };
        self.journal.push(JournalOp::Pending(id, prior));
    }

    fn set_known(&mut self, id: GhostId, value: Option<KnownGhost>) {
        let prior = match value {
            Some(entry) => self.known.insert(id, entry),
            None => self.known.remove(&id),
        };
        self.journal.push(JournalOp::Known(id, prior));
    }

    fn is_known(&self, ghost: SpawnedGhost) -> bool {
        self.known
            .get(&ghost.ghost_id)
            .is_some_and(|known| known.ghost == ghost)
    }

    /// Records that `ghost` of `ghost_type` was written to the client.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::GhostTypeChanged`] if the same ghost was
    /// previously sent with a different type.
    pub fn mark_sent(
        &mut self,
        ghost: SpawnedGhost,
        ghost_type: GhostTypeIndex,
        chunk: ChunkId,
    ) -> SerializeResult<()> {
        if let Some(known) = self.known.get(&ghost.ghost_id) {
            if known.ghost == ghost {
                if known.ghost_type != ghost_type {
                    return Err(SerializeError::GhostTypeChanged {
                        chunk,
                        expected: known.ghost_type,
                        found: ghost_type,
                    });
                }
                return Ok(());
            }
        }
        self.set_known(ghost.ghost_id, Some(KnownGhost { ghost, ghost_type }));
        Ok(())
    }

    /// The ghost was destroyed on the server.
    ///
    /// A pending relevancy removal becomes a real one. Ghosts the client
    /// never received need no notice.
    pub fn on_despawned(&mut self, ghost: SpawnedGhost) {
        if let Some(entry) = self.pending.get(&ghost.ghost_id).copied() {
            if entry.ghost == ghost && entry.kind == DespawnKind::Irrelevant {
                self.set_pending(
                    ghost.ghost_id,
                    Some(PendingDespawn {
                        kind: DespawnKind::Destroyed,
                        ..entry
                    }),
                );
            }
            return;
        }
        if self.is_known(ghost) {
            self.set_pending(ghost.ghost_id, Some(unsent(ghost, DespawnKind::Destroyed)));
        }
    }

    /// The ghost stopped being relevant to this connection.
    pub fn on_irrelevant(&mut self, ghost: SpawnedGhost) {
        if self.pending.contains_key(&ghost.ghost_id) || !self.is_known(ghost) {
            return;
        }
        self.set_pending(ghost.ghost_id, Some(unsent(ghost, DespawnKind::Irrelevant)));
    }

    /// The ghost is relevant again. Cancels a pending relevancy removal;
    /// a real despawn stays pending.
    pub fn on_relevant(&mut self, ghost: SpawnedGhost) {
        if let Some(entry) = self.pending.get(&ghost.ghost_id) {
            if entry.ghost == ghost && entry.kind == DespawnKind::Irrelevant {
                self.set_pending(ghost.ghost_id, None);
            }
        }
    }

    /// Returns the ids to write this tick, at most `max`.
    pub fn collect_for_send(
        &mut self,
        tick: SnapshotTick,
        ack: &SnapshotAck,
        repeat_ticks: u32,
        max: usize,
    ) -> Vec<i32> {
        let mut out = Vec::new();
        let entries: Vec<PendingDespawn> = self.pending.values().copied().collect();
        for entry in entries {
            let id = entry.ghost.ghost_id;
            let Some(first) = entry.first_sent else {
                if out.len() < max {
                    self.set_pending(id, Some(sent(entry, tick, tick)));
                    out.push(id.raw());
                }
                continue;
            };
            if window_received(ack, first, entry.last_sent) {
                self.set_pending(id, None);
                if self.is_known(entry.ghost) {
                    self.set_known(id, None);
                }
                continue;
            }
            if out.len() >= max {
                continue;
            }
            if tick.ticks_since(first) < repeat_ticks as i32 {
                self.set_pending(id, Some(sent(entry, first, tick)));
                out.push(id.raw());
            } else if ack.has_reached(entry.last_sent) {
                self.set_pending(id, Some(sent(entry, tick, tick)));
                out.push(id.raw());
            }
        }
        out
    }

    /// Returns `true` if a removal of `ghost_id` is still unacknowledged.
    #[must_use]
    pub fn has_pending(&self, ghost_id: GhostId) -> bool {
        self.pending.contains_key(&ghost_id)
    }

    /// The pending entry of a ghost.
    #[must_use]
    pub fn pending(&self, ghost_id: GhostId) -> Option<&PendingDespawn> {
        self.pending.get(&ghost_id)
    }

    /// Number of pending removals.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if the client may hold `ghost`.
    #[must_use]
    pub fn knows(&self, ghost: SpawnedGhost) -> bool {
        self.is_known(ghost)
    }

    /// Ghosts the client holds once every pending removal is applied.
    #[must_use]
    pub fn live_known_count(&self) -> usize {
        self.known
            .keys()
            .filter(|id| !self.pending.contains_key(id))
            .count()
    }

    /// Forgets recycled ids entirely.
    pub fn purge(&mut self, ids: &[GhostId]) {
        for id in ids {
            if self.pending.contains_key(id) {
                self.set_pending(*id, None);
            }
            if self.known.contains_key(id) {
                self.set_known(*id, None);
            }
        }
    }

    /// Current journal position.
    #[must_use]
    pub fn checkpoint(&self) -> DespawnCheckpoint {
        DespawnCheckpoint(self.journal.len())
    }

    /// Undoes every mutation made after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: DespawnCheckpoint) {
        while self.journal.len() > checkpoint.0 {
            match self.journal.pop() {
                Some(JournalOp::Pending(id, prior)) => match prior {
                    Some(entry) => {
                        self.pending.insert(id, entry);
                    }
                    None => {
                        self.pending.remove(&id);
                    }
                },
                Some(JournalOp::Known(id, prior)) => match prior {
                    Some(entry) => {
                        self.known.insert(id, entry);
                    }
                    None => {
                        self.known.remove(&id);
                    }
                },
                None => break,
            }
        }
    }

    /// Keeps every mutation and clears the journal.
    pub fn commit(&mut self) {
        self.journal.clear();
    }
}

const fn unsent(ghost: SpawnedGhost, kind: DespawnKind) -> PendingDespawn {
    PendingDespawn {
        ghost,
        kind,
        first_sent: None,
        last_sent: ghost.spawn_tick,
    }
}

const fn sent(entry: PendingDespawn, first: SnapshotTick, last: SnapshotTick) -> PendingDespawn {
    PendingDespawn {
        first_sent: Some(first),
        last_sent: last,
        ..entry
    }
}

fn window_received(ack: &SnapshotAck, first: SnapshotTick, last: SnapshotTick) -> bool {
    let span = last.ticks_since(first);
    if span < 0 {
        return false;
    }
    (0..=span as u32).any(|offset| ack.is_received(first.add(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ghost(id: i32) -> SpawnedGhost {
        SpawnedGhost::new(GhostId::new(id).unwrap(), SnapshotTick::new(1))
    }

    fn tick(raw: u32) -> SnapshotTick {
        SnapshotTick::new(raw)
    }

    fn tracker_with(ids: &[i32]) -> DespawnTracker {
        let mut tracker = DespawnTracker::new();
        for &id in ids {
            tracker
                .mark_sent(ghost(id), GhostTypeIndex::new(0), ChunkId(0))
                .unwrap();
        }
        tracker.commit();
        tracker
    }

    #[test]
    fn unknown_ghost_needs_no_notice() {
        let mut tracker = DespawnTracker::new();
        tracker.on_despawned(ghost(3));
        assert!(!tracker.has_pending(GhostId::new(3).unwrap()));
    }

    #[test]
    fn repeats_for_window_without_ack() {
        let mut tracker = tracker_with(&[42]);
        tracker.on_despawned(ghost(42));
        let ack = SnapshotAck::new();
        let mut sent_on = Vec::new();
        for t in 100..115 {
            if tracker.collect_for_send(tick(t), &ack, 5, 100).contains(&42) {
                sent_on.push(t);
            }
        }
        assert_eq!(sent_on, vec![100, 101, 102, 103, 104]);
        assert!(tracker.has_pending(GhostId::new(42).unwrap()));
    }

    #[test]
    fn ack_in_window_drops_entry() {
        let mut tracker = tracker_with(&[42]);
        tracker.on_despawned(ghost(42));
        let mut ack = SnapshotAck::new();
        assert_eq!(tracker.collect_for_send(tick(100), &ack, 5, 100), vec![42]);
        assert_eq!(tracker.collect_for_send(tick(101), &ack, 5, 100), vec![42]);
        ack.record(tick(101));
        assert!(tracker.collect_for_send(tick(102), &ack, 5, 100).is_empty());
        assert!(!tracker.has_pending(GhostId::new(42).unwrap()));
        assert_eq!(tracker.live_known_count(), 0);
    }

    #[test]
    fn lost_window_rearms() {
        let mut tracker = tracker_with(&[42]);
        tracker.on_despawned(ghost(42));
        let mut ack = SnapshotAck::new();
        for t in 100..105 {
            tracker.collect_for_send(tick(t), &ack, 5, 100);
        }
        assert!(tracker.collect_for_send(tick(105), &ack, 5, 100).is_empty());
        ack.record(tick(106));
        assert_eq!(tracker.collect_for_send(tick(107), &ack, 5, 100), vec![42]);
        assert_eq!(
            tracker.pending(GhostId::new(42).unwrap()).unwrap().first_sent,
            Some(tick(107))
        );
    }

    #[test]
    fn relevancy_removal_cancelled_when_relevant_again() {
        let mut tracker = tracker_with(&[7]);
        tracker.on_irrelevant(ghost(7));
        assert!(tracker.has_pending(GhostId::new(7).unwrap()));
        tracker.on_relevant(ghost(7));
        assert!(!tracker.has_pending(GhostId::new(7).unwrap()));
    }

    #[test]
    fn real_despawn_survives_relevant_again() {
        let mut tracker = tracker_with(&[7]);
        tracker.on_irrelevant(ghost(7));
        tracker.on_despawned(ghost(7));
        tracker.on_relevant(ghost(7));
        assert_eq!(
            tracker.pending(GhostId::new(7).unwrap()).unwrap().kind,
            DespawnKind::Destroyed
        );
    }

    #[test]
    fn collect_respects_max() {
        let mut tracker = tracker_with(&[1, 2, 3]);
        for id in 1..=3 {
            tracker.on_despawned(ghost(id));
        }
        let ack = SnapshotAck::new();
        assert_eq!(tracker.collect_for_send(tick(10), &ack, 5, 2), vec![1, 2]);
        assert_eq!(tracker.collect_for_send(tick(11), &ack, 5, 2), vec![1, 2]);
        assert_eq!(
            tracker.pending(GhostId::new(3).unwrap()).unwrap().first_sent,
            None
        );
    }

    #[test]
    fn rollback_restores_collect() {
        let mut tracker = tracker_with(&[42]);
        tracker.on_despawned(ghost(42));
        tracker.commit();
        let checkpoint = tracker.checkpoint();
        tracker.collect_for_send(tick(100), &SnapshotAck::new(), 5, 100);
        tracker.rollback(checkpoint);
        assert_eq!(
            tracker.pending(GhostId::new(42).unwrap()).unwrap().first_sent,
            None
        );
    }

    #[test]
    fn type_change_of_known_ghost_is_fatal() {
        let mut tracker = tracker_with(&[5]);
        assert!(matches!(
            tracker.mark_sent(ghost(5), GhostTypeIndex::new(1), ChunkId(2)),
            Err(SerializeError::GhostTypeChanged { .. })
        ));
    }

    #[test]
    fn purge_forgets_ids() {
        let mut tracker = tracker_with(&[5, 6]);
        tracker.on_despawned(ghost(5));
        tracker.purge(&[GhostId::new(5).unwrap()]);
        assert!(!tracker.has_pending(GhostId::new(5).unwrap()));
        assert_eq!(tracker.live_known_count(), 1);
    }
}
