mod common;

use codec::{
    ChunkId, EntityStamp, GhostChunk, GhostEntity, GhostId, GhostSendConfig, GhostWorld,
    SnapshotTick, SpawnedGhost,
};
use common::{mover, mover_type, registry, set_components, Link};
use proptest::prelude::*;
use schema::GhostTypeIndex;

#[derive(Debug, Clone)]
struct Step {
    moves: Vec<(usize, i64, i64, u64)>,
    delivered: bool,
}

fn step_strategy(entities: usize) -> impl Strategy<Value = Step> {
    (
        prop::collection::vec(
            (
                0..entities,
                -100_000i64..=100_000,
                -100_000i64..=100_000,
                0u64..1024,
            ),
            0..4,
        ),
        prop::bool::weighted(0.7),
    )
        .prop_map(|(moves, delivered)| Step { moves, delivered })
}

fn world(entities: usize) -> GhostWorld {
    let mut chunk = GhostChunk::new(ChunkId(1), GhostTypeIndex::new(0), entities);
    for n in 0..entities {
        chunk.entities.push(GhostEntity::new(
            EntityStamp::new(n as u32, 1),
            SpawnedGhost::new(GhostId::new(n as i32 + 1).unwrap(), SnapshotTick::new(1)),
            mover(0, 0, 0),
        ));
    }
    GhostWorld::new(vec![chunk])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the loss pattern, every delivered packet leaves the client
    /// holding exactly the server state of that tick.
    #[test]
    fn client_tracks_server_under_loss(
        steps in prop::collection::vec(step_strategy(5), 1..40),
        static_optimization in any::<bool>(),
        single_baseline in any::<bool>(),
    ) {
        let def = if static_optimization {
            mover_type().static_optimization()
        } else {
            mover_type()
        };
        let mut config = GhostSendConfig::for_testing();
        config.force_single_baseline = single_baseline;
        let mut link = Link::new(registry(vec![def]), config);
        let mut world = world(5);
        let mut state = vec![(0i64, 0i64, 0u64); 5];
        link.step(&world, 1);

        for (n, step) in steps.iter().enumerate() {
            for &(entity, x, y, hp) in &step.moves {
                set_components(&mut world, 0, entity, mover(x, y, hp));
                state[entity] = (x, y, hp);
            }
            let packet = link.build(&world, n as u32 + 2);
            if !step.delivered {
                continue;
            }
            link.deliver(&packet);
            let info = link.registry.info(GhostTypeIndex::new(0));
            for (entity, (x, y, hp)) in state.iter().enumerate() {
                let ghost = link.mirror.ghost(GhostId::new(entity as i32 + 1).unwrap());
                prop_assert!(ghost.is_some());
                let ghost = ghost.unwrap();
                prop_assert_eq!(ghost.field(info, 0, 0), Some(codec::FieldValue::FixedPoint(*x)));
                prop_assert_eq!(ghost.field(info, 0, 1), Some(codec::FieldValue::FixedPoint(*y)));
                prop_assert_eq!(ghost.field(info, 1, 0), Some(codec::FieldValue::UInt(*hp)));
            }
        }
    }
}
