//! The per-tick send loop.

use codec::{
    ChunkId, EntityImage, GhostSendConfig, GhostWorld, IdAllocator, NetworkId, PreSerialized,
    SerializeResult, SnapshotTick, SpawnedGhost,
};
use rayon::prelude::*;
use repgraph::ImportanceScaler;
use schema::TypeRegistry;
use tracing::{debug, error, warn};
use wire::SnapshotTransport;

use crate::connection::{ServerConnection, TickInputs};
use crate::error::{SendError, SendResult};
use crate::report::{ConnectionReport, SendOutcome, TickReport};

/// Drives snapshot sending for every connection.
///
/// A tick runs a single-threaded pre-pass over shared state (despawn
/// propagation, id recycling, stale history cleanup, pre-serialization),
/// then builds every connection's packet in parallel. Each connection task
/// owns its state and transport and only reads the registry and world.
pub struct GhostSendSystem<T> {
    registry: TypeRegistry,
    config: GhostSendConfig,
    ids: IdAllocator,
    connections: Vec<ServerConnection<T>>,
    despawned: Vec<SpawnedGhost>,
    scaler: Option<Box<dyn ImportanceScaler + Send>>,
    images: PreSerialized,
}

impl<T: SnapshotTransport + Send> GhostSendSystem<T> {
    #[must_use]
    pub fn new(registry: TypeRegistry, config: GhostSendConfig) -> Self {
        Self {
            registry,
            config,
            ids: IdAllocator::new(),
            connections: Vec::new(),
            despawned: Vec::new(),
            scaler: None,
            images: PreSerialized::new(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &GhostSendConfig {
        &self.config
    }

    #[must_use]
    pub const fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Installs the hook that rescales chunk priorities per connection.
    pub fn set_scaler(&mut self, scaler: impl ImportanceScaler + Send + 'static) {
        self.scaler = Some(Box::new(scaler));
    }

    pub fn clear_scaler(&mut self) {
        self.scaler = None;
    }

    /// Registers a client connection.
    pub fn add_connection(&mut self, network_id: NetworkId, transport: T) -> SendResult<()> {
        if self.connection(network_id).is_some() {
            return Err(SendError::DuplicateConnection(network_id));
        }
        self.connections
            .push(ServerConnection::new(network_id, transport, &self.config));
        debug!(connection = network_id.0, "connection added");
        Ok(())
    }

    /// Drops a connection and everything sent to it.
    pub fn remove_connection(&mut self, network_id: NetworkId) -> Option<ServerConnection<T>> {
        let index = self
            .connections
            .iter()
            .position(|conn| conn.network_id() == network_id)?;
        Some(self.connections.swap_remove(index))
    }

    #[must_use]
    pub fn connection(&self, network_id: NetworkId) -> Option<&ServerConnection<T>> {
        self.connections
            .iter()
            .find(|conn| conn.network_id() == network_id)
    }

    pub fn connection_mut(&mut self, network_id: NetworkId) -> Option<&mut ServerConnection<T>> {
        self.connections
            .iter_mut()
            .find(|conn| conn.network_id() == network_id)
    }

    #[must_use]
    pub fn connections(&self) -> &[ServerConnection<T>] {
        &self.connections
    }

    /// Applies a client's ack report.
    pub fn on_ack(
        &mut self,
        network_id: NetworkId,
        last_received: SnapshotTick,
        mask: [u64; 4],
    ) -> SendResult<()> {
        self.connection_mut(network_id)
            .ok_or(SendError::UnknownConnection(network_id))?
            .on_ack(last_received, mask);
        Ok(())
    }

    /// Records the client's clock and command age, echoed in the next header.
    pub fn on_client_timing(
        &mut self,
        network_id: NetworkId,
        remote_time: u32,
        command_age: i32,
    ) -> SendResult<()> {
        let conn = self
            .connection_mut(network_id)
            .ok_or(SendError::UnknownConnection(network_id))?;
        conn.state.remote_time = remote_time;
        conn.state.command_age = command_age;
        Ok(())
    }

    /// Allocates an id for a ghost spawned at `tick`.
    pub fn spawn(&mut self, tick: SnapshotTick) -> SpawnedGhost {
        self.ids.allocate(tick)
    }

    /// Allocates a negative id for a ghost the client spawned ahead of the
    /// server.
    pub fn spawn_prespawned(&mut self, tick: SnapshotTick) -> Option<SpawnedGhost> {
        self.ids.allocate_prespawn(tick)
    }

    /// Queues a destroyed ghost. The removal reaches every connection on the
    /// next tick.
    pub fn despawn(&mut self, ghost: SpawnedGhost) {
        self.despawned.push(ghost);
    }

    /// Sends this tick's snapshot to every in-game connection.
    pub fn tick(&mut self, world: &GhostWorld, tick: SnapshotTick, local_time: u32) -> TickReport {
        let recycled_ids = self.prepare(world, tick);
        let ack_watermark = self.ack_watermark();
        let pre_serialized_chunks = self.pre_serialize(world);
        let prespawn = world
            .chunks()
            .iter()
            .flat_map(|chunk| &chunk.entities)
            .any(|entity| entity.ghost_id().is_some_and(|id| id.is_prespawned()));

        let inputs = TickInputs {
            registry: &self.registry,
            config: &self.config,
            world,
            images: &self.images,
            scaler: self
                .scaler
                .as_deref()
                .map(|scaler| scaler as &dyn ImportanceScaler),
            tick,
            local_time,
            prespawn,
        };
        let profile_components = self.config.profile_components;
        let connections = self
            .connections
            .par_iter_mut()
            .map(|conn| {
                let outcome = conn.send_snapshot(&inputs);
                match &outcome {
                    SendOutcome::Failed(err) => error!(
                        connection = conn.network_id().0,
                        tick = tick.raw(),
                        error = %err,
                        "snapshot send failed"
                    ),
                    SendOutcome::GaveUp { attempts } => warn!(
                        connection = conn.network_id().0,
                        tick = tick.raw(),
                        attempts,
                        "no packet size fit, skipping tick"
                    ),
                    _ => {}
                }
                ConnectionReport {
                    network_id: conn.network_id(),
                    outcome,
                    profile: if profile_components {
                        conn.profile()
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();

        TickReport {
            tick,
            ack_watermark,
            recycled_ids,
            pre_serialized_chunks,
            connections,
        }
    }

    /// Propagates despawns, recycles acknowledged ids, drops history of
    /// chunks that left the world and starts the wait clock of new chunks.
    /// Returns the number of recycled ids.
    fn prepare(&mut self, world: &GhostWorld, tick: SnapshotTick) -> usize {
        for ghost in std::mem::take(&mut self.despawned) {
            self.ids.begin_despawn(ghost, tick);
            for conn in &mut self.connections {
                conn.state.despawns.on_despawned(ghost);
            }
        }

        let connections = &self.connections;
        let recycled = self
            .ids
            .release_acked(tick, self.config.despawn_grace_ticks, |id| {
                connections
                    .iter()
                    .any(|conn| conn.state.despawns.has_pending(id))
            });

        for conn in &mut self.connections {
            if !recycled.is_empty() {
                conn.state.despawns.purge(&recycled);
            }
            let history = &mut conn.state.history;
            history.remove_stale(world.chunks().iter().map(|chunk| chunk.id));
            for chunk in world.chunks() {
                history.note_waiting(chunk.id, tick);
            }
            conn.state.commit();
        }
        recycled.len()
    }

    /// Oldest tick every in-game connection has acknowledged.
    ///
    /// `None` while some in-game connection has acknowledged nothing.
    fn ack_watermark(&self) -> Option<SnapshotTick> {
        let mut watermark: Option<SnapshotTick> = None;
        for conn in self.connections.iter().filter(|conn| conn.state.in_game) {
            let last = conn.state.ack().last_received()?;
            watermark = Some(match watermark {
                Some(current) if last.is_newer_than(current) => current,
                _ => last,
            });
        }
        watermark
    }

    /// Builds record images once for every chunk whose type asks for it.
    fn pre_serialize(&mut self, world: &GhostWorld) -> usize {
        self.images.clear();
        if !self.connections.iter().any(|conn| conn.state.in_game) {
            return 0;
        }
        let registry = &self.registry;
        let force = self.config.force_pre_serialize;
        let built: Vec<(ChunkId, SerializeResult<Vec<EntityImage>>)> = world
            .chunks()
            .par_iter()
            .filter_map(|chunk| {
                let info = registry.get(chunk.ghost_type)?;
                if chunk.is_empty() || !(force || info.pre_serialize) {
                    return None;
                }
                Some((chunk.id, PreSerialized::build_chunk(info, chunk)))
            })
            .collect();
        let mut count = 0;
        for (chunk, images) in built {
            match images {
                Ok(images) => {
                    self.images.insert(chunk, images);
                    count += 1;
                }
                Err(err) => warn!(
                    chunk = chunk.0,
                    error = %err,
                    "pre-serialization failed, connections build their own images"
                ),
            }
        }
        count
    }
}
