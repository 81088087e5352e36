//! One client connection and the packet build for one tick.

use bitstream::BitWriter;
use codec::{
    serialize_chunk, ChunkWriteResult, ConnectionState, GhostSendConfig, GhostWorld, NetworkId,
    PreSerialized, SerializeContext, SnapshotTick,
};
use repgraph::{prioritize, select_within_budget, ConnectionRelevancy, ImportanceScaler};
use schema::TypeRegistry;
use tracing::{debug, trace, warn};
use wire::{
    select_channel, ChannelKind, SnapshotHeader, SnapshotPrelude, SnapshotTransport,
    TypeAnnouncement,
};

use crate::error::SendResult;
use crate::report::{ComponentBits, PacketStats, SendOutcome};

/// Read-only inputs shared by every connection task during a tick.
#[derive(Clone, Copy)]
pub(crate) struct TickInputs<'a> {
    pub registry: &'a TypeRegistry,
    pub config: &'a GhostSendConfig,
    pub world: &'a GhostWorld,
    pub images: &'a PreSerialized,
    pub scaler: Option<&'a dyn ImportanceScaler>,
    pub tick: SnapshotTick,
    pub local_time: u32,
    /// Some live ghost carries a prespawn id.
    pub prespawn: bool,
}

/// A connection's send state, relevancy set and transport handle.
#[derive(Debug)]
pub struct ServerConnection<T> {
    pub state: ConnectionState,
    pub relevancy: ConnectionRelevancy,
    pub transport: T,
}

enum Attempt {
    Sent(PacketStats),
    /// Chunks were waiting but not one entity fit.
    TooSmall,
}

impl<T: SnapshotTransport> ServerConnection<T> {
    pub(crate) fn new(network_id: NetworkId, transport: T, config: &GhostSendConfig) -> Self {
        Self {
            state: ConnectionState::new(network_id, config),
            relevancy: ConnectionRelevancy::new(config.relevancy_mode),
            transport,
        }
    }

    #[must_use]
    pub const fn network_id(&self) -> NetworkId {
        self.state.network_id()
    }

    /// Applies an ack report from the client.
    pub fn on_ack(&mut self, last_received: SnapshotTick, mask: [u64; 4]) {
        self.state.on_ack(last_received, mask);
    }

    /// Builds and sends this tick's snapshot, doubling the packet size after
    /// every failed attempt until `max_packet_size`.
    pub(crate) fn send_snapshot(&mut self, inputs: &TickInputs<'_>) -> SendOutcome {
        if !self.state.in_game {
            return SendOutcome::NotInGame;
        }
        self.state.profile.clear();
        let config = inputs.config;
        let max_size = config.max_packet_size.max(1);
        let mut size = config.default_packet_size.clamp(1, max_size);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let checkpoint = self.state.checkpoint();
            match self.attempt(inputs, size, size >= max_size) {
                Ok(Attempt::Sent(mut stats)) => {
                    self.state.commit();
                    stats.attempts = attempts;
                    trace!(
                        connection = self.network_id().0,
                        bytes = stats.bytes,
                        chunks = stats.chunks,
                        entities = stats.entities,
                        "snapshot sent"
                    );
                    return SendOutcome::Sent(stats);
                }
                Ok(Attempt::TooSmall) => {
                    self.state.rollback(checkpoint);
                    debug!(
                        connection = self.network_id().0,
                        size, "nothing fit, retrying with a larger packet"
                    );
                }
                Err(err) if err.is_retryable() => {
                    self.state.rollback(checkpoint);
                    debug!(
                        connection = self.network_id().0,
                        size,
                        error = %err,
                        "packet attempt failed, retrying with a larger packet"
                    );
                }
                Err(err) => {
                    self.state.rollback(checkpoint);
                    self.state.commit();
                    return SendOutcome::Failed(err);
                }
            }
            self.state.profile.clear();
            if size >= max_size {
                self.state.commit();
                return SendOutcome::GaveUp { attempts };
            }
            size = size.saturating_mul(2).min(max_size);
        }
    }

    fn attempt(
        &mut self,
        inputs: &TickInputs<'_>,
        size: usize,
        last_attempt: bool,
    ) -> SendResult<Attempt> {
        let channel = select_channel(size, self.transport.payload_limit(ChannelKind::Unreliable));
        let mut buffer = self.transport.begin_send(channel, size)?;
        let written = write_snapshot(
            &mut self.state,
            &self.relevancy,
            inputs,
            buffer.writer(),
            last_attempt,
        );
        match written {
            Ok(Some(mut stats)) => {
                stats.bytes = self.transport.end_send(buffer)?;
                stats.channel = Some(channel);
                if !self.state.profile.is_empty() {
                    trace!(
                        connection = self.network_id().0,
                        bits = self.state.profile.total_bits(),
                        "component profile"
                    );
                }
                Ok(Attempt::Sent(stats))
            }
            Ok(None) => {
                self.transport.abort_send(buffer);
                Ok(Attempt::TooSmall)
            }
            Err(err) => {
                self.transport.abort_send(buffer);
                Err(err)
            }
        }
    }

    /// Per-component bit totals of the last send.
    #[must_use]
    pub fn profile(&self) -> Vec<ComponentBits> {
        self.state
            .profile
            .iter()
            .map(|(ghost_type, component, stats)| ComponentBits {
                ghost_type,
                component,
                bits: stats.bits,
                writes: stats.writes,
            })
            .collect()
    }
}

/// Writes one snapshot into `packet`.
///
/// Returns `None` when chunks were waiting but not a single entity fit, so
/// a larger packet should be tried. On the `last_attempt` such chunks are
/// skipped instead and the rest of the packet is still sent.
fn write_snapshot(
    state: &mut ConnectionState,
    relevancy: &ConnectionRelevancy,
    inputs: &TickInputs<'_>,
    packet: &mut BitWriter,
    last_attempt: bool,
) -> SendResult<Option<PacketStats>> {
    let TickInputs {
        registry,
        config,
        world,
        tick,
        ..
    } = *inputs;
    let limits = config.wire_limits();
    let mut stats = PacketStats::default();

    let range = state
        .types
        .announce(tick, registry.len(), config.max_new_types_per_snapshot);
    let new_types: Vec<TypeAnnouncement> = registry
        .iter()
        .skip(range.start)
        .take(range.len())
        .map(|info| TypeAnnouncement {
            id: info.id.raw(),
            content_hash: info.content_hash,
        })
        .collect();
    stats.new_types = new_types.len();
    let prelude = SnapshotPrelude {
        header: SnapshotHeader {
            local_time: inputs.local_time,
            remote_time: state.remote_time,
            command_age: state.command_age,
            sequence: state.next_sequence(),
            tick: tick.raw(),
        },
        new_types,
        relevant_ghost_count: u32::try_from(state.despawns.live_known_count()).unwrap_or(u32::MAX),
        prespawn: inputs.prespawn,
    };
    let placeholders = wire::write_prelude(packet, &prelude, &limits)?;

    let despawn_start = packet.bytes_written();
    let ack = *state.ack();
    let despawns = state.despawns.collect_for_send(
        tick,
        &ack,
        config.despawn_repeat_ticks,
        config.max_despawns_per_snapshot,
    );
    stats.despawns = despawns.len();
    wire::write_despawn_list(packet, &despawns, &limits)?;
    let update_start = packet.bytes_written();
    placeholders.patch_despawn_len(packet, update_start - despawn_start)?;

    let prios = prioritize(world, state, registry, config, tick, inputs.scaler);
    let prios = select_within_budget(
        prios,
        config.max_chunks_per_tick,
        config.max_entities_per_tick,
    );
    let ctx = SerializeContext {
        registry,
        config,
        world,
        images: inputs.images,
        relevancy,
        tick,
    };
    for prio in &prios {
        let result = serialize_chunk(&ctx, state, prio.chunk_index, prio.start_index, packet)?;
        trace!(
            connection = state.network_id().0,
            chunk = prio.chunk.0,
            priority = prio.priority,
            ?result,
            "chunk serialized"
        );
        match result {
            ChunkWriteResult::Written {
                entities,
                resume_index,
            } => {
                stats.chunks += 1;
                stats.entities += entities;
                if resume_index.is_some() {
                    stats.partial_chunks += 1;
                }
            }
            ChunkWriteResult::Full { resume_index } if stats.entities == 0 => {
                if !last_attempt {
                    return Ok(None);
                }
                warn!(
                    connection = state.network_id().0,
                    chunk = prio.chunk.0,
                    entity = resume_index,
                    max_packet_size = config.max_packet_size,
                    "entity does not fit the largest packet, chunk skipped"
                );
                stats.oversized_chunks += 1;
            }
            ChunkWriteResult::Full { .. } => break,
            ChunkWriteResult::Deferred => stats.deferred_chunks += 1,
            ChunkWriteResult::Skipped => {}
        }
    }
    let update_len = packet.bytes_written() - update_start;
    placeholders.patch_update_len(packet, update_len)?;
    Ok(Some(stats))
}
