//! Configurable limits for snapshot packets.

/// Wire-level limits for snapshot packets.
///
/// Encoders refuse to exceed them and decoders validate counts against them
/// before iterating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum packet size in bytes.
    pub max_packet_bytes: usize,

    /// Maximum number of ghost types announced in one snapshot.
    pub max_new_types_per_snapshot: usize,

    /// Maximum number of despawned ghost ids in one snapshot.
    pub max_despawns_per_snapshot: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_packet_bytes: 64 * 1024,
            max_new_types_per_snapshot: 32,
            max_despawns_per_snapshot: 100,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_packet_bytes: 4096,
            max_new_types_per_snapshot: 4,
            max_despawns_per_snapshot: 8,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_packet_bytes: usize::MAX,
            max_new_types_per_snapshot: usize::MAX,
            max_despawns_per_snapshot: usize::MAX,
        }
    }
}
