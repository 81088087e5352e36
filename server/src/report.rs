//! What one tick of the send loop did.

use codec::{NetworkId, SnapshotTick};
use schema::GhostTypeIndex;
use wire::ChannelKind;

use crate::error::SendError;

/// Per-connection outcome of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A snapshot was committed to the transport.
    Sent(PacketStats),
    /// The connection is not in game yet.
    NotInGame,
    /// Every size up to `max_packet_size` failed; nothing was sent.
    GaveUp { attempts: usize },
    /// A fatal error; the connection's tick was abandoned.
    Failed(SendError),
}

impl SendOutcome {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }

    #[must_use]
    pub const fn stats(&self) -> Option<&PacketStats> {
        match self {
            Self::Sent(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Contents of a committed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub bytes: usize,
    pub channel: Option<ChannelKind>,
    /// Packet attempts this tick, including the successful one.
    pub attempts: usize,
    pub new_types: usize,
    pub despawns: usize,
    /// Chunks that wrote at least one entity.
    pub chunks: usize,
    pub entities: usize,
    /// Chunks that stopped early because the packet filled.
    pub partial_chunks: usize,
    /// Chunks skipped because a group member was not ready.
    pub deferred_chunks: usize,
    /// Chunks whose next entity did not fit even the largest packet.
    pub oversized_chunks: usize,
}

/// Bits spent on one component of one ghost type this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentBits {
    pub ghost_type: GhostTypeIndex,
    pub component: usize,
    pub bits: u64,
    pub writes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub network_id: NetworkId,
    pub outcome: SendOutcome,
    /// Empty unless component profiling is enabled.
    pub profile: Vec<ComponentBits>,
}

/// Summary of one [`GhostSendSystem::tick`](crate::GhostSendSystem::tick).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: SnapshotTick,
    /// Oldest tick acknowledged by every in-game connection.
    pub ack_watermark: Option<SnapshotTick>,
    /// Ghost ids returned to the free list.
    pub recycled_ids: usize,
    /// Chunks whose images were built once for all connections.
    pub pre_serialized_chunks: usize,
    pub connections: Vec<ConnectionReport>,
}

impl TickReport {
    /// Total bytes committed across connections.
    #[must_use]
    pub fn bytes_sent(&self) -> usize {
        self.connections
            .iter()
            .filter_map(|report| report.outcome.stats())
            .map(|stats| stats.bytes)
            .sum()
    }

    /// Connections whose tick failed or gave up.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.connections
            .iter()
            .filter(|report| {
                matches!(
                    report.outcome,
                    SendOutcome::Failed(_) | SendOutcome::GaveUp { .. }
                )
            })
            .count()
    }

    #[must_use]
    pub fn connection(&self, network_id: NetworkId) -> Option<&ConnectionReport> {
        self.connections
            .iter()
            .find(|report| report.network_id == network_id)
    }
}
