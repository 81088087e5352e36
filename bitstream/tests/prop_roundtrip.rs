use bitstream::{packed_u32_len, BitReader, BitWriter};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Bit(bool),
    Bits { bits: usize, value: u64 },
    Align,
    Packed(u32),
    PackedSigned(i32),
    Delta { value: u32, base: u32 },
}

fn mask_value(bits: usize, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Bit),
        (0usize..=64, any::<u64>()).prop_map(|(bits, value)| Op::Bits {
            bits,
            value: mask_value(bits, value),
        }),
        Just(Op::Align),
        any::<u32>().prop_map(Op::Packed),
        any::<i32>().prop_map(Op::PackedSigned),
        (any::<u32>(), any::<u32>()).prop_map(|(value, base)| Op::Delta { value, base }),
    ]
}

fn write_op(writer: &mut BitWriter, op: &Op) {
    match op {
        Op::Bit(b) => writer.write_bool(*b).unwrap(),
        Op::Bits { bits, value } => writer.write_bits(*value, *bits).unwrap(),
        Op::Align => writer.align_to_byte().unwrap(),
        Op::Packed(v) => writer.write_packed_u32(*v).unwrap(),
        Op::PackedSigned(v) => writer.write_packed_i32(*v).unwrap(),
        Op::Delta { value, base } => writer.write_packed_u32_delta(*value, *base).unwrap(),
    }
}

proptest! {
    #[test]
    fn prop_roundtrip_ops(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let mut writer = BitWriter::new();
        for op in &ops {
            write_op(&mut writer, op);
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);

        for op in &ops {
            match op {
                Op::Bit(b) => prop_assert_eq!(reader.read_bool().unwrap(), *b),
                Op::Bits { bits, value } => {
                    prop_assert_eq!(reader.read_bits(*bits).unwrap(), *value);
                }
                Op::Align => reader.align_to_byte().unwrap(),
                Op::Packed(v) => prop_assert_eq!(reader.read_packed_u32().unwrap(), *v),
                Op::PackedSigned(v) => prop_assert_eq!(reader.read_packed_i32().unwrap(), *v),
                Op::Delta { value, base } => {
                    prop_assert_eq!(reader.read_packed_u32_delta(*base).unwrap(), *value);
                }
            }
        }
        prop_assert!(reader.bits_remaining() < 8);
    }

    #[test]
    fn prop_packed_len_matches_written(value in any::<u32>()) {
        let mut writer = BitWriter::new();
        writer.write_packed_u32(value).unwrap();
        prop_assert_eq!(writer.bits_written(), packed_u32_len(value));
    }

    #[test]
    fn prop_rewind_restores_prefix(
        prefix in prop::collection::vec(op_strategy(), 0..16),
        suffix in prop::collection::vec(op_strategy(), 1..16),
    ) {
        let mut expected = BitWriter::new();
        for op in &prefix {
            write_op(&mut expected, op);
        }

        let mut writer = BitWriter::new();
        for op in &prefix {
            write_op(&mut writer, op);
        }
        let mark = writer.mark();
        for op in &suffix {
            write_op(&mut writer, op);
        }
        writer.rewind(mark);

        prop_assert_eq!(writer.bits_written(), expected.bits_written());
        prop_assert_eq!(writer.as_bytes(), expected.as_bytes());
    }

    #[test]
    fn prop_append_matches_direct_write(
        lead in 0usize..16,
        ops in prop::collection::vec(op_strategy(), 1..32),
    ) {
        let mut source = BitWriter::new();
        for op in &ops {
            write_op(&mut source, op);
        }

        let mut direct = BitWriter::new();
        direct.write_bits(0, lead).unwrap();
        for op in &ops {
            write_op(&mut direct, op);
        }

        let mut appended = BitWriter::new();
        appended.write_bits(0, lead).unwrap();
        appended.append_bits(&source, 0..source.bits_written()).unwrap();

        // Align ops depend on the absolute position, so only compare when
        // the lead keeps byte alignment identical.
        if lead % 8 == 0 || !ops.iter().any(|op| matches!(op, Op::Align)) {
            prop_assert_eq!(appended.as_bytes(), direct.as_bytes());
        }
        prop_assert_eq!(appended.bits_written(), lead + source.bits_written());
    }
}
