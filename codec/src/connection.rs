//! Per-connection send state.

use std::ops::Range;

use schema::GhostTypeIndex;

use crate::ack::SnapshotAck;
use crate::config::GhostSendConfig;
use crate::despawn::{DespawnCheckpoint, DespawnTracker};
use crate::history::ConnectionHistory;
use crate::profile::ComponentProfile;
use crate::rollback::{RollbackLog, RollbackMark};
use crate::scratch::ScratchStream;
use crate::types::{NetworkId, SnapshotTick};

/// Tracks which ghost types a connection has been told about.
///
/// Types are announced in registration order. Every packet repeats the
/// unacknowledged ones; a type is usable once a packet announcing it was
/// acknowledged.
#[derive(Debug, Clone, Default)]
pub struct TypeAnnouncer {
    acked_upto: usize,
    pending: Vec<(SnapshotTick, usize)>,
}

impl TypeAnnouncer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Type indices to announce in the packet for `tick`.
    pub fn announce(&mut self, tick: SnapshotTick, registered: usize, max: usize) -> Range<usize> {
        let upto = registered.min(self.acked_upto.saturating_add(max));
        if upto > self.acked_upto {
            self.pending.retain(|&(t, _)| t != tick);
            self.pending.push((tick, upto));
        }
        self.acked_upto..upto.max(self.acked_upto)
    }

    /// Applies the client's ack state.
    pub fn on_ack(&mut self, ack: &SnapshotAck) {
        let mut acked_upto = self.acked_upto;
        self.pending.retain(|&(tick, upto)| {
            if ack.is_received(tick) {
                acked_upto = acked_upto.max(upto);
                false
            } else {
                !ack.has_reached(tick)
            }
        });
        self.acked_upto = acked_upto;
    }

    /// Returns `true` if the client acknowledged the type.
    #[must_use]
    pub const fn is_announced(&self, index: GhostTypeIndex) -> bool {
        index.as_usize() < self.acked_upto
    }

    /// Number of acknowledged types.
    #[must_use]
    pub const fn acked_upto(&self) -> usize {
        self.acked_upto
    }
}

/// Position to roll a connection back to when a packet is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCheckpoint {
    history: RollbackMark,
    despawns: DespawnCheckpoint,
}

/// Everything the sender keeps for one connection.
///
/// Owned by exactly one task during a tick.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub(crate) network_id: NetworkId,
    /// Snapshots are only sent to connections in game.
    pub in_game: bool,
    pub(crate) ack: SnapshotAck,
    pub history: ConnectionHistory,
    pub despawns: DespawnTracker,
    pub types: TypeAnnouncer,
    pub profile: ComponentProfile,
    /// Last client timestamp, echoed in the header.
    pub remote_time: u32,
    /// Age of the client's newest command, echoed in the header.
    pub command_age: i32,
    sequence: u8,
    pub(crate) scratch: ScratchStream,
    pub(crate) rollback: RollbackLog,
}

impl ConnectionState {
    /// Creates the state of a newly connected client.
    #[must_use]
    pub fn new(network_id: NetworkId, config: &GhostSendConfig) -> Self {
        Self {
            network_id,
            in_game: true,
            ack: SnapshotAck::new(),
            history: ConnectionHistory::new(),
            despawns: DespawnTracker::new(),
            types: TypeAnnouncer::new(),
            profile: ComponentProfile::new(),
            remote_time: 0,
            command_age: 0,
            sequence: 0,
            scratch: ScratchStream::new(config.initial_scratch_size),
            rollback: RollbackLog::new(),
        }
    }

    #[must_use]
    pub const fn network_id(&self) -> NetworkId {
        self.network_id
    }

    #[must_use]
    pub const fn ack(&self) -> &SnapshotAck {
        &self.ack
    }

    /// Applies an ack report from the client.
    pub fn on_ack(&mut self, last_received: SnapshotTick, mask: [u64; 4]) {
        self.ack.update(last_received, mask);
        self.types.on_ack(&self.ack);
    }

    /// Returns the sequence id for the next packet.
    pub fn next_sequence(&mut self) -> u8 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Current scratch capacity in bytes.
    #[must_use]
    pub const fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }

    /// Marks the start of a packet attempt.
    #[must_use]
    pub fn checkpoint(&self) -> ConnectionCheckpoint {
        ConnectionCheckpoint {
            history: self.rollback.mark(),
            despawns: self.despawns.checkpoint(),
        }
    }

    /// Undoes everything the abandoned packet attempt changed.
    pub fn rollback(&mut self, checkpoint: ConnectionCheckpoint) {
        self.rollback.rollback_to(checkpoint.history, &mut self.history);
        self.despawns.rollback(checkpoint.despawns);
    }

    /// Keeps everything the sent packet changed.
    pub fn commit(&mut self) {
        self.rollback.commit();
        self.despawns.commit();
    }
}
