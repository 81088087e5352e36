//! Deterministic layout hashing.

use blake3::Hasher;

use crate::ghost::GhostTypeDef;
use crate::{FieldCodec, FixedPoint};

/// Computes the content hash announced with a ghost type.
///
/// Covers everything that affects the wire encoding of the type and nothing
/// that only affects scheduling (importance, pre-serialization).
#[must_use]
pub fn content_hash(def: &GhostTypeDef) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(&def.id.raw().to_le_bytes());
    write_u8(&mut hasher, u8::from(def.group_root));
    write_u8(&mut hasher, u8::from(def.static_optimization));
    write_u32(&mut hasher, def.components.len() as u32);

    for component in &def.components {
        write_u16(&mut hasher, component.component.id.get());
        write_u16(&mut hasher, component.entity_index);
        write_u8(&mut hasher, u8::from(component.buffer));
        write_u8(&mut hasher, u8::from(component.enableable));
        write_u8(&mut hasher, component.send_to as u8);
        write_u8(&mut hasher, component.send_for.bits());
        write_u32(&mut hasher, component.component.fields.len() as u32);
        for field in &component.component.fields {
            write_u16(&mut hasher, field.id.get());
            write_codec(&mut hasher, field.codec);
        }
    }

    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

fn write_codec(hasher: &mut Hasher, codec: FieldCodec) {
    match codec {
        FieldCodec::Bool => {
            write_u8(hasher, 0);
        }
        FieldCodec::UInt { bits } => {
            write_u8(hasher, 1);
            write_u8(hasher, bits);
        }
        FieldCodec::SInt { bits } => {
            write_u8(hasher, 2);
            write_u8(hasher, bits);
        }
        FieldCodec::VarUInt => {
            write_u8(hasher, 3);
        }
        FieldCodec::VarSInt => {
            write_u8(hasher, 4);
        }
        FieldCodec::FixedPoint(fp) => {
            write_u8(hasher, 5);
            write_fixed_point(hasher, fp);
        }
    }
}

fn write_fixed_point(hasher: &mut Hasher, fp: FixedPoint) {
    hasher.update(&fp.min_q.to_le_bytes());
    hasher.update(&fp.max_q.to_le_bytes());
    write_u32(hasher, fp.scale);
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u16(hasher: &mut Hasher, value: u16) {
    hasher.update(&value.to_le_bytes());
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentDef, ComponentId, FieldDef, FieldId, GhostComponentDef, GhostTypeId};

    fn cid(value: u16) -> ComponentId {
        ComponentId::new(value).unwrap()
    }

    fn fid(value: u16) -> FieldId {
        FieldId::new(value).unwrap()
    }

    fn position() -> ComponentDef {
        ComponentDef::new(cid(1), "Position")
            .field(FieldDef::new(fid(1), FieldCodec::fixed_point(-500, 500, 100)))
            .field(FieldDef::new(fid(2), FieldCodec::fixed_point(-500, 500, 100)))
    }

    fn def() -> GhostTypeDef {
        GhostTypeDef::new(GhostTypeId::new(7)).component(GhostComponentDef::root(position()))
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(&def()), content_hash(&def()));
    }

    #[test]
    fn content_hash_ignores_importance() {
        assert_eq!(content_hash(&def()), content_hash(&def().importance(50)));
    }

    #[test]
    fn content_hash_changes_with_field_codec() {
        let other = GhostTypeDef::new(GhostTypeId::new(7)).component(GhostComponentDef::root(
            ComponentDef::new(cid(1), "Position")
                .field(FieldDef::new(fid(1), FieldCodec::fixed_point(-500, 500, 10)))
                .field(FieldDef::new(fid(2), FieldCodec::fixed_point(-500, 500, 100))),
        ));
        assert_ne!(content_hash(&def()), content_hash(&other));
    }

    #[test]
    fn content_hash_changes_with_send_rules() {
        let other = GhostTypeDef::new(GhostTypeId::new(7)).component(
            GhostComponentDef::root(position()).send_to(crate::SendTo::Owner),
        );
        assert_ne!(content_hash(&def()), content_hash(&other));
    }
}
