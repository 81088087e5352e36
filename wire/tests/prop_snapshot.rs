use bitstream::BitWriter;
use proptest::prelude::*;
use wire::{
    decode_snapshot, write_despawn_list, write_prelude, Limits, SnapshotHeader, SnapshotPrelude,
    TypeAnnouncement,
};

fn announcement() -> impl Strategy<Value = TypeAnnouncement> {
    (any::<u128>(), any::<u64>()).prop_map(|(id, content_hash)| TypeAnnouncement {
        id,
        content_hash,
    })
}

proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let _ = decode_snapshot(&bytes, &Limits::default());
    }

    #[test]
    fn prop_prelude_and_despawns_survive_encoding(
        tick in any::<u32>(),
        command_age in any::<i32>(),
        new_types in prop::collection::vec(announcement(), 0..=32),
        despawns in prop::collection::vec(
            any::<i32>().prop_filter("nonzero", |id| *id != 0),
            0..=100,
        ),
        relevant in any::<u32>(),
        prespawn in any::<bool>(),
    ) {
        let limits = Limits::default();
        let prelude = SnapshotPrelude {
            header: SnapshotHeader { tick, command_age, ..SnapshotHeader::default() },
            new_types,
            relevant_ghost_count: relevant,
            prespawn,
        };
        let mut writer = BitWriter::new();
        let placeholders = write_prelude(&mut writer, &prelude, &limits).unwrap();
        let start = writer.bytes_written();
        write_despawn_list(&mut writer, &despawns, &limits).unwrap();
        let despawn_bytes = writer.bytes_written() - start;
        placeholders.patch_despawn_len(&mut writer, despawn_bytes).unwrap();
        let bytes = writer.finish();

        let decoded = decode_snapshot(&bytes, &limits).unwrap();
        prop_assert_eq!(decoded.prelude, prelude);
        prop_assert_eq!(decoded.despawned, despawns);
        prop_assert!(decoded.updates.is_empty());
    }
}
