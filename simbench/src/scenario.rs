//! Deterministic multi-connection scenario.
//!
//! Units wander a square map, take damage in bursts and are periodically
//! destroyed and respawned. Props never change. Every connection owns a
//! loopback transport and a decoding [`ClientMirror`]; packets are dropped
//! with a seeded probability and acks flow back after each tick. A final
//! lossless settle phase must leave every client equal to the world.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use anyhow::{Context, Result};
use codec::{
    ChunkId, ClientMirror, ComponentState, ComponentValue, EntityStamp, FieldValue, GhostChunk,
    GhostEntity, GhostSendConfig, GhostWorld, NetworkId, SnapshotTick,
};
use repgraph::{DistanceScaler, Vec3};
use schema::{
    ComponentDef, ComponentId, FieldCodec, FieldDef, FieldId, GhostComponentDef, GhostTypeDef,
    GhostTypeId, GhostTypeIndex, TypeRegistry,
};
use server::GhostSendSystem;
use tracing::{debug, info, warn};
use wire::LoopbackTransport;

use crate::rng::Rng;
use crate::summary::Summary;

const POS_MIN: i64 = -100_000;
const POS_MAX: i64 = 100_000;
const POS_SCALE: u32 = 100;
const MAX_SPEED: i64 = 400;
const MAX_HEALTH: u64 = 1000;
const UNIT: GhostTypeIndex = GhostTypeIndex::new(0);
const PROP: GhostTypeIndex = GhostTypeIndex::new(1);
const TILE_SIZE: f32 = 20_000.0;

/// Knobs of one run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub connections: u32,
    pub units: usize,
    pub props: usize,
    /// Entities per chunk.
    pub per_chunk: usize,
    /// Ticks with movement and loss.
    pub ticks: u32,
    /// Lossless ticks without movement run before verification.
    pub settle_ticks: u32,
    pub seed: u64,
    pub loss_percent: u32,
    /// Destroy and respawn one unit every N ticks.
    pub churn_every: Option<u32>,
    /// Damage every unit every N ticks.
    pub burst_every: Option<u32>,
    /// Scale chunk importance by distance to a per-connection viewer.
    pub distance_scaling: bool,
    pub send: GhostSendConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            connections: 4,
            units: 256,
            props: 64,
            per_chunk: 32,
            ticks: 300,
            settle_ticks: 32,
            seed: 1,
            loss_percent: 5,
            churn_every: Some(10),
            burst_every: None,
            distance_scaling: false,
            send: GhostSendConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// A small run that finishes quickly in tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connections: 2,
            units: 24,
            props: 8,
            per_chunk: 8,
            ticks: 40,
            settle_ticks: 24,
            send: GhostSendConfig::for_testing(),
            ..Self::default()
        }
    }
}

/// Motion and health of one unit, keyed by entity index.
#[derive(Debug, Clone, Copy)]
struct UnitState {
    x: i64,
    y: i64,
    vx: i64,
    vy: i64,
    health: u64,
}

impl UnitState {
    fn components(self) -> Vec<ComponentState> {
        vec![
            ComponentState::fields(vec![
                FieldValue::FixedPoint(self.x),
                FieldValue::FixedPoint(self.y),
            ]),
            ComponentState::fields(vec![FieldValue::UInt(self.health)]),
        ]
    }
}

/// A server, its connections and their clients.
pub struct Scenario {
    config: ScenarioConfig,
    system: GhostSendSystem<LoopbackTransport>,
    clients: BTreeMap<NetworkId, ClientMirror>,
    world: GhostWorld,
    units: HashMap<u32, UnitState>,
    scaler: Option<DistanceScaler>,
    world_rng: Rng,
    net_rng: Rng,
    next_stamp: u32,
    next_chunk: u64,
    tick: u32,
    summary: Summary,
}

/// Ghost types of the scenario: moving units and static props.
pub fn registry() -> Result<TypeRegistry> {
    let coord = || FieldCodec::fixed_point(POS_MIN, POS_MAX, POS_SCALE);
    let position = ComponentDef::new(component_id(1)?, "Position")
        .field(FieldDef::new(field_id(1)?, coord()))
        .field(FieldDef::new(field_id(2)?, coord()));
    let health = ComponentDef::new(component_id(2)?, "Health")
        .field(FieldDef::new(field_id(1)?, FieldCodec::uint(10)));

    let mut registry = TypeRegistry::new();
    registry
        .register(
            GhostTypeDef::new(GhostTypeId::from_name("Unit"))
                .importance(2)
                .component(GhostComponentDef::root(position.clone()))
                .component(GhostComponentDef::root(health)),
        )
        .context("register Unit")?;
    registry
        .register(
            GhostTypeDef::new(GhostTypeId::from_name("Prop"))
                .static_optimization()
                .pre_serialize()
                .component(GhostComponentDef::root(position)),
        )
        .context("register Prop")?;
    Ok(registry)
}

fn component_id(raw: u16) -> Result<ComponentId> {
    ComponentId::new(raw).with_context(|| format!("component id {raw}"))
}

fn field_id(raw: u16) -> Result<FieldId> {
    FieldId::new(raw).with_context(|| format!("field id {raw}"))
}

impl Scenario {
    /// Builds the world and connects every client.
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        let registry = registry()?;
        let mut system = GhostSendSystem::new(registry.clone(), config.send.clone());
        let mut clients = BTreeMap::new();
        for id in 1..=config.connections {
            let network_id = NetworkId(i32::try_from(id).context("connection id")?);
            system
                .add_connection(network_id, LoopbackTransport::default())
                .with_context(|| format!("add connection {id}"))?;
            clients.insert(network_id, ClientMirror::new(registry.clone(), &config.send));
        }

        let scaler = config.distance_scaling.then(|| {
            let mut scaler = DistanceScaler::new(TILE_SIZE);
            for (n, id) in clients.keys().enumerate() {
                let offset = (n as f32).mul_add(TILE_SIZE, POS_MIN as f32);
                scaler.set_viewer(*id, Vec3::new(offset, offset, 0.0));
            }
            scaler
        });

        let mut scenario = Self {
            world_rng: Rng::new(config.seed),
            net_rng: Rng::new(config.seed ^ 0x9e37_79b9_7f4a_7c15),
            config,
            system,
            clients,
            world: GhostWorld::default(),
            units: HashMap::new(),
            scaler,
            next_stamp: 0,
            next_chunk: 1,
            tick: 0,
            summary: Summary::default(),
        };
        scenario.populate();
        Ok(scenario)
    }

    fn populate(&mut self) {
        let spawn_tick = SnapshotTick::new(1);
        let per_chunk = self.config.per_chunk.max(1);
        let mut chunks = Vec::new();
        for n in 0..self.config.units {
            if n % per_chunk == 0 {
                chunks.push(GhostChunk::new(self.take_chunk_id(), UNIT, per_chunk));
            }
            let entity = self.new_unit(spawn_tick);
            if let Some(chunk) = chunks.last_mut() {
                chunk.entities.push(entity);
            }
        }
        for n in 0..self.config.props {
            if n % per_chunk == 0 {
                chunks.push(GhostChunk::new(self.take_chunk_id(), PROP, per_chunk));
            }
            let stamp = self.take_stamp();
            let ghost = self.system.spawn(spawn_tick);
            let x = self.world_rng.range_i64(POS_MIN, POS_MAX);
            let y = self.world_rng.range_i64(POS_MIN, POS_MAX);
            if let Some(chunk) = chunks.last_mut() {
                chunk.entities.push(GhostEntity::new(
                    stamp,
                    ghost,
                    vec![ComponentState::fields(vec![
                        FieldValue::FixedPoint(x),
                        FieldValue::FixedPoint(y),
                    ])],
                ));
            }
        }
        self.world = GhostWorld::new(chunks);
    }

    fn take_chunk_id(&mut self) -> ChunkId {
        let id = ChunkId(self.next_chunk);
        self.next_chunk += 1;
        id
    }

    fn take_stamp(&mut self) -> EntityStamp {
        let stamp = EntityStamp::new(self.next_stamp, 1);
        self.next_stamp += 1;
        stamp
    }

    fn new_unit(&mut self, tick: SnapshotTick) -> GhostEntity {
        let stamp = self.take_stamp();
        let ghost = self.system.spawn(tick);
        let state = UnitState {
            x: self.world_rng.range_i64(POS_MIN / 2, POS_MAX / 2),
            y: self.world_rng.range_i64(POS_MIN / 2, POS_MAX / 2),
            vx: self.world_rng.range_i64(-MAX_SPEED, MAX_SPEED),
            vy: self.world_rng.range_i64(-MAX_SPEED, MAX_SPEED),
            health: MAX_HEALTH,
        };
        self.units.insert(stamp.index, state);
        GhostEntity::new(stamp, ghost, state.components())
    }

    /// Runs the whole scenario and verifies every client.
    pub fn run(mut self) -> Result<Summary> {
        info!(
            connections = self.config.connections,
            units = self.config.units,
            props = self.config.props,
            ticks = self.config.ticks,
            seed = self.config.seed,
            "scenario started"
        );
        for _ in 0..self.config.ticks {
            self.step(true);
        }
        for _ in 0..self.config.settle_ticks {
            self.step(false);
        }
        self.verify();

        let config = &self.config;
        let mut summary = self.summary;
        summary.connections = config.connections;
        summary.units = config.units;
        summary.props = config.props;
        summary.ticks = config.ticks;
        summary.seed = config.seed;
        summary.loss_percent = config.loss_percent;
        summary.churn_every = config.churn_every;
        summary.burst_every = config.burst_every;
        summary.finalize();
        info!(
            packets = summary.packets_sent,
            avg_bytes = summary.avg_packet_bytes,
            p95_bytes = summary.p95_packet_bytes,
            mismatches = summary.mismatches,
            "scenario finished"
        );
        Ok(summary)
    }

    /// One server tick. `live` enables movement, churn and packet loss.
    fn step(&mut self, live: bool) {
        self.tick += 1;
        let tick = SnapshotTick::new(self.tick);
        if live {
            self.move_units();
            if every(self.config.churn_every, self.tick) {
                self.churn(tick);
            }
        }
        if let Some(scaler) = &mut self.scaler {
            update_centers(scaler, &self.world);
            self.system.set_scaler(scaler.clone());
        }

        let start = Instant::now();
        let report = self.system.tick(&self.world, tick, self.tick.wrapping_mul(16));
        let elapsed = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        debug!(
            tick = self.tick,
            bytes = report.bytes_sent(),
            failures = report.failures(),
            elapsed_us = elapsed,
            "tick sent"
        );
        self.summary.record_tick(&report, elapsed);
        self.deliver(live);
    }

    /// Hands each connection's packets to its client and feeds acks back.
    fn deliver(&mut self, lossy: bool) {
        for (&id, client) in &mut self.clients {
            let Some(conn) = self.system.connection_mut(id) else {
                continue;
            };
            for (_, packet) in conn.transport.drain() {
                if lossy && self.net_rng.chance(self.config.loss_percent) {
                    self.summary.dropped_packets += 1;
                    continue;
                }
                if let Err(err) = client.receive(&packet) {
                    self.summary.decode_errors += 1;
                    warn!(connection = id.0, error = %err, "client rejected packet");
                }
            }
            if let Some(last) = client.ack().last_received() {
                conn.on_ack(last, client.ack().mask());
            }
            conn.state.remote_time = self.tick.wrapping_mul(16);
        }
    }

    fn move_units(&mut self) {
        let burst = every(self.config.burst_every, self.tick);
        for chunk in self.world.chunks_mut() {
            if chunk.ghost_type != UNIT {
                continue;
            }
            for entity in &mut chunk.entities {
                let Some(state) = self.units.get_mut(&entity.stamp.index) else {
                    continue;
                };
                if self.world_rng.chance(5) {
                    state.vx = self.world_rng.range_i64(-MAX_SPEED, MAX_SPEED);
                    state.vy = self.world_rng.range_i64(-MAX_SPEED, MAX_SPEED);
                }
                (state.x, state.vx) = bounce(state.x, state.vx);
                (state.y, state.vy) = bounce(state.y, state.vy);
                if burst || self.world_rng.chance(2) {
                    let damage = self.world_rng.range_i64(1, 50).unsigned_abs();
                    state.health = match state.health.checked_sub(damage) {
                        Some(health) if health > 0 => health,
                        _ => MAX_HEALTH,
                    };
                }
                entity.components = state.components();
            }
            chunk.change_version += 1;
        }
    }

    /// Destroys one random unit and spawns a replacement.
    fn churn(&mut self, tick: SnapshotTick) {
        let unit_chunks: Vec<usize> = self
            .world
            .chunks()
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.ghost_type == UNIT && !chunk.is_empty())
            .map(|(index, _)| index)
            .collect();
        if unit_chunks.is_empty() {
            return;
        }
        let chunk_index = unit_chunks[self.world_rng.index(unit_chunks.len())];
        let chunk = &mut self.world.chunks_mut()[chunk_index];
        let slot = self.world_rng.index(chunk.entities.len());
        let removed = chunk.entities.remove(slot);
        chunk.order_version += 1;
        self.units.remove(&removed.stamp.index);
        if let Some(ghost) = removed.ghost {
            self.system.despawn(ghost);
        }

        let entity = self.new_unit(tick);
        self.place_unit(entity, tick);
        self.world.reindex();
    }

    fn place_unit(&mut self, entity: GhostEntity, tick: SnapshotTick) {
        let per_chunk = self.config.per_chunk.max(1);
        let open = self
            .world
            .chunks_mut()
            .iter_mut()
            .find(|chunk| chunk.ghost_type == UNIT && chunk.len() < per_chunk);
        if let Some(chunk) = open {
            chunk.entities.push(entity);
            chunk.order_version += 1;
            return;
        }
        let mut chunk = GhostChunk::new(self.take_chunk_id(), UNIT, per_chunk);
        debug!(chunk = chunk.id.0, tick = tick.raw(), "unit chunk created");
        chunk.entities.push(entity);
        self.world.chunks_mut().push(chunk);
    }

    /// Counts field values and ghosts where a client differs from the world.
    fn verify(&mut self) {
        let registry = self.system.registry();
        for (id, client) in &self.clients {
            let mut mismatches = 0;
            for chunk in self.world.chunks() {
                let info = registry.info(chunk.ghost_type);
                for entity in &chunk.entities {
                    let Some(ghost_id) = entity.ghost_id() else {
                        continue;
                    };
                    let mirror = client.ghost(ghost_id);
                    for (component, state) in entity.components.iter().enumerate() {
                        let ComponentValue::Fields(fields) = &state.value else {
                            continue;
                        };
                        for (field, value) in fields.iter().enumerate() {
                            let seen = mirror.and_then(|ghost| ghost.field(info, component, field));
                            if seen != Some(*value) {
                                mismatches += 1;
                            }
                        }
                    }
                }
            }
            let stale = client
                .ghosts()
                .filter(|ghost| self.world.entity_by_ghost(ghost.ghost_id).is_none())
                .count() as u64;
            if mismatches > 0 || stale > 0 {
                warn!(connection = id.0, mismatches, stale, "client diverged");
            }
            self.summary.mismatches += mismatches;
            self.summary.stale_ghosts += stale;
        }
    }
}

/// Recomputes each unit chunk's center from its members.
fn update_centers(scaler: &mut DistanceScaler, world: &GhostWorld) {
    for chunk in world.chunks() {
        let mut sum = (0.0f32, 0.0f32);
        let mut count = 0u32;
        for entity in &chunk.entities {
            if let Some(ComponentValue::Fields(fields)) =
                entity.components.first().map(|state| &state.value)
            {
                if let [FieldValue::FixedPoint(x), FieldValue::FixedPoint(y), ..] =
                    fields.as_slice()
                {
                    sum.0 += *x as f32;
                    sum.1 += *y as f32;
                    count += 1;
                }
            }
        }
        if count > 0 {
            let n = count as f32;
            scaler.set_chunk_center(chunk.id, Vec3::new(sum.0 / n, sum.1 / n, 0.0));
        }
    }
}

fn bounce(position: i64, velocity: i64) -> (i64, i64) {
    let next = position + velocity;
    if next <= POS_MIN || next >= POS_MAX {
        (next.clamp(POS_MIN, POS_MAX), -velocity)
    } else {
        (next, velocity)
    }
}

const fn every(period: Option<u32>, tick: u32) -> bool {
    match period {
        Some(every) if every > 0 => tick % every == 0,
        _ => false,
    }
}
