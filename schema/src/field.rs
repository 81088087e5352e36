//! Field codec definitions.
//!
//! Every field is stored in a snapshot record as one little-endian `u32`
//! word, whatever its codec. The codec only decides how the word goes on
//! the wire.

use crate::error::{SchemaError, SchemaResult};
use crate::FieldId;

/// Fixed-point quantization parameters (all integer-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedPoint {
    /// Minimum quantized value.
    pub min_q: i64,
    /// Maximum quantized value.
    pub max_q: i64,
    /// Units per 1.0 (e.g., 100 => 0.01 resolution).
    pub scale: u32,
}

impl FixedPoint {
    /// Creates a fixed-point configuration from quantized bounds and scale.
    #[must_use]
    pub const fn new(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self {
            min_q,
            max_q,
            scale,
        }
    }

    /// Quantizes a real value, clamping to the configured range.
    #[must_use]
    pub fn quantize(&self, value: f64) -> i64 {
        let q = (value * f64::from(self.scale)).round() as i64;
        q.clamp(self.min_q, self.max_q)
    }

    /// Converts a quantized value back to a real value.
    #[must_use]
    pub fn dequantize(&self, q: i64) -> f64 {
        q as f64 / f64::from(self.scale)
    }

    fn validate(self) -> SchemaResult<()> {
        if self.scale == 0 {
            return Err(SchemaError::InvalidFixedPointScale { scale: self.scale });
        }
        if self.min_q > self.max_q
            || self.min_q < i64::from(i32::MIN)
            || self.max_q > i64::from(i32::MAX)
        {
            return Err(SchemaError::InvalidFixedPointRange {
                min_q: self.min_q,
                max_q: self.max_q,
            });
        }
        Ok(())
    }
}

/// The encoding for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldCodec {
    /// Boolean (1 raw bit).
    Bool,

    /// Unsigned integer with fixed bit width, sent raw.
    UInt { bits: u8 },

    /// Signed integer with fixed bit width, sent raw (two's complement).
    SInt { bits: u8 },

    /// Unsigned integer sent as a packed delta against a prediction.
    VarUInt,

    /// Signed integer sent as a packed delta against a prediction.
    VarSInt,

    /// Quantized real sent as a packed delta against a prediction.
    FixedPoint(FixedPoint),
}

impl FieldCodec {
    /// Creates a boolean field codec.
    #[must_use]
    pub const fn bool() -> Self {
        Self::Bool
    }

    /// Creates an unsigned integer field codec.
    #[must_use]
    pub const fn uint(bits: u8) -> Self {
        Self::UInt { bits }
    }

    /// Creates a signed integer field codec.
    #[must_use]
    pub const fn sint(bits: u8) -> Self {
        Self::SInt { bits }
    }

    /// Creates a variable-length unsigned integer field codec.
    #[must_use]
    pub const fn var_uint() -> Self {
        Self::VarUInt
    }

    /// Creates a variable-length signed integer field codec.
    #[must_use]
    pub const fn var_sint() -> Self {
        Self::VarSInt
    }

    /// Creates a fixed-point field codec.
    #[must_use]
    pub const fn fixed_point(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self::FixedPoint(FixedPoint::new(min_q, max_q, scale))
    }

    /// Width in bits for codecs written raw, `None` for delta-coded ones.
    #[must_use]
    pub const fn raw_bits(self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::UInt { bits } | Self::SInt { bits } => Some(bits as usize),
            Self::VarUInt | Self::VarSInt | Self::FixedPoint(_) => None,
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::UInt { .. } => "uint",
            Self::SInt { .. } => "sint",
            Self::VarUInt => "varuint",
            Self::VarSInt => "varsint",
            Self::FixedPoint(_) => "fixed-point",
        }
    }

    pub(crate) fn validate(self) -> SchemaResult<()> {
        match self {
            Self::UInt { bits } | Self::SInt { bits } => {
                if bits == 0 || bits > 32 {
                    return Err(SchemaError::InvalidBitWidth { bits });
                }
            }
            Self::FixedPoint(fp) => fp.validate()?,
            Self::Bool | Self::VarUInt | Self::VarSInt => {}
        }
        Ok(())
    }
}

/// Field definition within a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    pub id: FieldId,
    pub codec: FieldCodec,
}

impl FieldDef {
    /// Creates a field definition.
    #[must_use]
    pub const fn new(id: FieldId, codec: FieldCodec) -> Self {
        Self { id, codec }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_quantize_clamps() {
        let fp = FixedPoint::new(-100, 200, 100);
        assert_eq!(fp.quantize(0.5), 50);
        assert_eq!(fp.quantize(-5.0), -100);
        assert_eq!(fp.quantize(9.0), 200);
        assert!((fp.dequantize(150) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_bits_by_codec() {
        assert_eq!(FieldCodec::bool().raw_bits(), Some(1));
        assert_eq!(FieldCodec::uint(12).raw_bits(), Some(12));
        assert_eq!(FieldCodec::sint(5).raw_bits(), Some(5));
        assert_eq!(FieldCodec::var_uint().raw_bits(), None);
        assert_eq!(FieldCodec::fixed_point(-1, 1, 10).raw_bits(), None);
    }

    #[test]
    fn bit_width_bounds() {
        assert!(FieldCodec::uint(32).validate().is_ok());
        assert_eq!(
            FieldCodec::uint(0).validate(),
            Err(SchemaError::InvalidBitWidth { bits: 0 })
        );
        assert_eq!(
            FieldCodec::sint(33).validate(),
            Err(SchemaError::InvalidBitWidth { bits: 33 })
        );
    }

    #[test]
    fn fixed_point_must_fit_a_word() {
        assert!(matches!(
            FieldCodec::fixed_point(0, i64::from(i32::MAX) + 1, 10).validate(),
            Err(SchemaError::InvalidFixedPointRange { .. })
        ));
        assert!(matches!(
            FieldCodec::fixed_point(10, -10, 10).validate(),
            Err(SchemaError::InvalidFixedPointRange { .. })
        ));
        assert!(matches!(
            FieldCodec::fixed_point(-10, 10, 0).validate(),
            Err(SchemaError::InvalidFixedPointScale { scale: 0 })
        ));
    }
}
