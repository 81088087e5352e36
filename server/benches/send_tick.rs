use std::hint::black_box;

use codec::{
    ChunkId, ComponentState, EntityStamp, FieldValue, GhostChunk, GhostEntity, GhostSendConfig,
    GhostWorld, NetworkId, SnapshotTick,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use schema::{
    ComponentDef, ComponentId, FieldCodec, FieldDef, FieldId, GhostComponentDef, GhostTypeDef,
    GhostTypeId, GhostTypeIndex, TypeRegistry,
};
use server::GhostSendSystem;
use wire::LoopbackTransport;

const PER_CHUNK: usize = 64;

fn registry() -> TypeRegistry {
    let position = ComponentDef::new(ComponentId::new(1).unwrap(), "Position")
        .field(FieldDef::new(
            FieldId::new(1).unwrap(),
            FieldCodec::fixed_point(-1_000_000, 1_000_000, 100),
        ))
        .field(FieldDef::new(
            FieldId::new(2).unwrap(),
            FieldCodec::fixed_point(-1_000_000, 1_000_000, 100),
        ));
    let health = ComponentDef::new(ComponentId::new(2).unwrap(), "Health")
        .field(FieldDef::new(FieldId::new(1).unwrap(), FieldCodec::uint(10)));
    let mut registry = TypeRegistry::new();
    registry
        .register(
            GhostTypeDef::new(GhostTypeId::from_name("Unit"))
                .component(GhostComponentDef::root(position))
                .component(GhostComponentDef::root(health)),
        )
        .unwrap();
    registry
}

fn setup(entities: usize, connections: i32) -> (GhostSendSystem<LoopbackTransport>, GhostWorld) {
    let mut config = GhostSendConfig::default();
    config.max_packet_size = 64 * 1024;
    let mut system = GhostSendSystem::new(registry(), config);
    for id in 1..=connections {
        system
            .add_connection(NetworkId(id), LoopbackTransport::new(1200, 64 * 1024))
            .unwrap();
    }
    let mut chunks = Vec::new();
    for n in 0..entities {
        if n % PER_CHUNK == 0 {
            chunks.push(GhostChunk::new(
                ChunkId(chunks.len() as u64 + 1),
                GhostTypeIndex::new(0),
                PER_CHUNK,
            ));
        }
        let ghost = system.spawn(SnapshotTick::new(1));
        if let Some(chunk) = chunks.last_mut() {
            chunk.entities.push(GhostEntity::new(
                EntityStamp::new(n as u32, 1),
                ghost,
                vec![
                    ComponentState::fields(vec![
                        FieldValue::FixedPoint(n as i64),
                        FieldValue::FixedPoint(-(n as i64)),
                    ]),
                    ComponentState::fields(vec![FieldValue::UInt(100)]),
                ],
            ));
        }
    }
    (system, GhostWorld::new(chunks))
}

fn move_world(world: &mut GhostWorld, tick: u32) {
    for chunk in world.chunks_mut() {
        for entity in &mut chunk.entities {
            if let codec::ComponentValue::Fields(fields) = &mut entity.components[0].value {
                fields[0] = FieldValue::FixedPoint(i64::from(tick % 1000));
            }
        }
        chunk.change_version += 1;
    }
}

fn ack_everything(
    system: &mut GhostSendSystem<LoopbackTransport>,
    tick: SnapshotTick,
    connections: i32,
) {
    for id in 1..=connections {
        if let Some(conn) = system.connection_mut(NetworkId(id)) {
            conn.transport.drain();
            conn.on_ack(tick, [u64::MAX; 4]);
        }
    }
}

fn benchmark_send_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_tick");
    for &(entities, connections) in &[(256usize, 4i32), (1024, 16), (4096, 32)] {
        group.throughput(Throughput::Elements((entities * connections as usize) as u64));
        group.bench_with_input(
            BenchmarkId::new("moving", format!("{entities}x{connections}")),
            &(entities, connections),
            |b, &(entities, connections)| {
                let (mut system, mut world) = setup(entities, connections);
                let mut tick = 1u32;
                b.iter(|| {
                    move_world(&mut world, tick);
                    let now = SnapshotTick::new(tick);
                    black_box(system.tick(&world, now, tick));
                    ack_everything(&mut system, now, connections);
                    tick += 1;
                });
            },
        );
    }
    group.finish();
}

fn benchmark_static_world(c: &mut Criterion) {
    c.bench_function("send_tick/static_1024x16", |b| {
        let (mut system, world) = setup(1024, 16);
        let mut tick = 1u32;
        b.iter(|| {
            let now = SnapshotTick::new(tick);
            black_box(system.tick(&world, now, tick));
            ack_everything(&mut system, now, 16);
            tick += 1;
        });
    });
}

criterion_group!(benches, benchmark_send_tick, benchmark_static_world);
criterion_main!(benches);
