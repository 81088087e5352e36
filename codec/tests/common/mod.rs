#![allow(dead_code)]

use bitstream::BitWriter;
use codec::{
    serialize_chunk, AllRelevant, ChunkWriteResult, ClientMirror, ComponentState, ConnectionState,
    FieldValue, GhostChunk, GhostEntity, GhostSendConfig, GhostWorld, MirrorUpdate, NetworkId,
    PreSerialized, RelevancyFilter, SerializeContext, SnapshotTick,
};
use schema::{
    ComponentDef, ComponentId, FieldCodec, FieldDef, FieldId, GhostComponentDef, GhostTypeDef,
    GhostTypeId, TypeRegistry,
};
use wire::{SnapshotHeader, SnapshotPrelude, TypeAnnouncement};

pub fn cid(value: u16) -> ComponentId {
    ComponentId::new(value).unwrap()
}

pub fn fid(value: u16) -> FieldId {
    FieldId::new(value).unwrap()
}

/// x/y fixed point in [-1000, 1000] with 0.01 resolution.
pub fn position() -> ComponentDef {
    ComponentDef::new(cid(1), "Position")
        .field(FieldDef::new(fid(1), FieldCodec::fixed_point(-100_000, 100_000, 100)))
        .field(FieldDef::new(fid(2), FieldCodec::fixed_point(-100_000, 100_000, 100)))
}

pub fn health() -> ComponentDef {
    ComponentDef::new(cid(2), "Health").field(FieldDef::new(fid(1), FieldCodec::uint(10)))
}

pub fn inventory() -> ComponentDef {
    ComponentDef::new(cid(3), "Inventory")
        .field(FieldDef::new(fid(1), FieldCodec::var_uint()))
        .field(FieldDef::new(fid(2), FieldCodec::uint(6)))
}

pub fn owner() -> ComponentDef {
    ComponentDef::new(cid(4), "Owner").field(FieldDef::new(fid(1), FieldCodec::var_sint()))
}

pub fn secret() -> ComponentDef {
    ComponentDef::new(cid(5), "Secret").field(FieldDef::new(fid(1), FieldCodec::var_uint()))
}

pub fn mover_type() -> GhostTypeDef {
    GhostTypeDef::new(GhostTypeId::from_name("Mover"))
        .component(GhostComponentDef::root(position()))
        .component(GhostComponentDef::root(health()))
}

pub fn registry(defs: Vec<GhostTypeDef>) -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    for def in defs {
        registry.register(def).unwrap();
    }
    registry
}

pub fn mover(x: i64, y: i64, hp: u64) -> Vec<ComponentState> {
    vec![
        ComponentState::fields(vec![FieldValue::FixedPoint(x), FieldValue::FixedPoint(y)]),
        ComponentState::fields(vec![FieldValue::UInt(hp)]),
    ]
}

pub fn set_components(
    world: &mut GhostWorld,
    chunk: usize,
    entity: usize,
    components: Vec<ComponentState>,
) {
    let chunk: &mut GhostChunk = &mut world.chunks_mut()[chunk];
    let target: &mut GhostEntity = &mut chunk.entities[entity];
    target.components = components;
    chunk.change_version += 1;
}

/// One server connection wired to one decoding client.
pub struct Link {
    pub registry: TypeRegistry,
    pub config: GhostSendConfig,
    pub conn: ConnectionState,
    pub mirror: ClientMirror,
    pub packet_size: usize,
}

impl Link {
    pub fn new(registry: TypeRegistry, config: GhostSendConfig) -> Self {
        Self::with_network_id(registry, config, NetworkId(1))
    }

    pub fn with_network_id(
        registry: TypeRegistry,
        config: GhostSendConfig,
        network_id: NetworkId,
    ) -> Self {
        let conn = ConnectionState::new(network_id, &config);
        let mirror = ClientMirror::new(registry.clone(), &config);
        let packet_size = config.default_packet_size;
        Self {
            registry,
            config,
            conn,
            mirror,
            packet_size,
        }
    }

    /// Builds the packet for `tick`: prelude, despawns, then every chunk in
    /// world order until the packet fills.
    pub fn build(&mut self, world: &GhostWorld, tick: u32) -> Vec<u8> {
        self.build_with(world, tick, &AllRelevant)
    }

    pub fn build_with(
        &mut self,
        world: &GhostWorld,
        tick: u32,
        relevancy: &dyn RelevancyFilter,
    ) -> Vec<u8> {
        let tick = SnapshotTick::new(tick);
        let limits = self.config.wire_limits();
        let mut packet = BitWriter::bounded(self.packet_size);

        let range = self.conn.types.announce(
            tick,
            self.registry.len(),
            self.config.max_new_types_per_snapshot,
        );
        let new_types = self
            .registry
            .iter()
            .skip(range.start)
            .take(range.len())
            .map(|info| TypeAnnouncement {
                id: info.id.raw(),
                content_hash: info.content_hash,
            })
            .collect();
        let prelude = SnapshotPrelude {
            header: SnapshotHeader {
                tick: tick.raw(),
                sequence: self.conn.next_sequence(),
                ..SnapshotHeader::default()
            },
            new_types,
            relevant_ghost_count: self.conn.despawns.live_known_count() as u32,
            prespawn: false,
        };
        let placeholders = wire::write_prelude(&mut packet, &prelude, &limits).unwrap();
        let despawn_start = packet.bytes_written();
        let ack = *self.conn.ack();
        let despawns = self.conn.despawns.collect_for_send(
            tick,
            &ack,
            self.config.despawn_repeat_ticks,
            self.config.max_despawns_per_snapshot,
        );
        wire::write_despawn_list(&mut packet, &despawns, &limits).unwrap();
        let update_start = packet.bytes_written();
        placeholders
            .patch_despawn_len(&mut packet, update_start - despawn_start)
            .unwrap();

        let images = PreSerialized::new();
        let ctx = SerializeContext {
            registry: &self.registry,
            config: &self.config,
            world,
            images: &images,
            relevancy,
            tick,
        };
        for (index, chunk) in world.chunks().iter().enumerate() {
            if chunk.group_member || !self.conn.types.is_announced(chunk.ghost_type) {
                continue;
            }
            let start = self
                .conn
                .history
                .get(chunk.id)
                .and_then(|history| history.send.resume_index)
                .unwrap_or(0);
            let result: ChunkWriteResult =
                serialize_chunk(&ctx, &mut self.conn, index, start, &mut packet).unwrap();
            if result.is_packet_full() {
                break;
            }
        }
        let update_len = packet.bytes_written() - update_start;
        placeholders.patch_update_len(&mut packet, update_len).unwrap();
        self.conn.commit();
        packet.finish()
    }

    /// Delivers a packet and feeds the client's ack back to the server.
    pub fn deliver(&mut self, packet: &[u8]) -> MirrorUpdate {
        let update = self.mirror.receive(packet).unwrap();
        self.feed_ack();
        update
    }

    pub fn feed_ack(&mut self) {
        let ack = *self.mirror.ack();
        if let Some(last) = ack.last_received() {
            self.conn.on_ack(last, ack.mask());
        }
    }

    /// Builds and delivers in one step.
    pub fn step(&mut self, world: &GhostWorld, tick: u32) -> Vec<u8> {
        let packet = self.build(world, tick);
        self.deliver(&packet);
        packet
    }
}
