//! Send configuration.

/// Number of history slots kept per chunk per connection.
pub const SNAPSHOT_HISTORY_SIZE: usize = 32;

/// Maximum number of baselines used for one entity.
pub const MAX_BASELINES: usize = 3;

/// Baseline age sentinel. Written as the tick delta of an absent baseline.
pub const MAX_BASELINE_AGE: u32 = 1 << 28;

/// Number of times a chunk is re-serialized with a doubled scratch stream
/// before giving up.
pub const MAX_SCRATCH_RETRIES: usize = 8;

/// How the per-connection relevancy set is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelevancyMode {
    /// Every ghost is relevant to every connection.
    #[default]
    Disabled,
    /// Only ghosts in the set are relevant.
    SetIsRelevant,
    /// Ghosts in the set are irrelevant, everything else is relevant.
    SetIsIrrelevant,
}

/// Options recognized by the snapshot sender.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GhostSendConfig {
    /// Ghost types announced per snapshot.
    pub max_new_types_per_snapshot: usize,
    /// Despawned ids written per snapshot.
    pub max_despawns_per_snapshot: usize,
    /// Slots older than this many ticks are never used as baselines.
    pub max_baseline_age: u32,
    /// Ticks a despawn notice is repeated after its first send.
    pub despawn_repeat_ticks: u32,
    /// Ticks after which a despawned id is recycled even if some
    /// connection never acknowledged the despawn.
    pub despawn_grace_ticks: u32,
    /// Chunks scoring below this are not sent.
    pub min_send_importance: u32,
    /// Chunks scoring below this after scaling are not sent.
    pub min_distance_scaled_importance: u32,
    /// Chunks per connection per tick (0 = unlimited).
    pub max_chunks_per_tick: usize,
    /// Entities per connection per tick (0 = unlimited).
    pub max_entities_per_tick: usize,
    /// Divisor applied to chunks that were entirely irrelevant last send.
    pub irrelevant_importance_downscale: u32,
    /// Use at most one baseline per entity.
    pub force_single_baseline: bool,
    /// Build record images once per tick for every type.
    pub force_pre_serialize: bool,
    /// Migrate history by entity identity when a chunk is reordered.
    pub keep_history_across_structural_change: bool,
    /// Size of the first packet attempt, in bytes.
    pub default_packet_size: usize,
    /// Largest packet attempt, in bytes.
    pub max_packet_size: usize,
    /// Initial per-connection scratch stream size, in bytes.
    pub initial_scratch_size: usize,
    /// Prefix every entity with its payload size in bits.
    pub entity_size_prefix: bool,
    /// Accumulate per-component bit counts.
    pub profile_components: bool,
    pub relevancy_mode: RelevancyMode,
}

impl Default for GhostSendConfig {
    fn default() -> Self {
        Self {
            max_new_types_per_snapshot: 32,
            max_despawns_per_snapshot: 100,
            max_baseline_age: MAX_BASELINE_AGE,
            despawn_repeat_ticks: 5,
            despawn_grace_ticks: 256,
            min_send_importance: 0,
            min_distance_scaled_importance: 0,
            max_chunks_per_tick: 0,
            max_entities_per_tick: 0,
            irrelevant_importance_downscale: 1,
            force_single_baseline: false,
            force_pre_serialize: false,
            keep_history_across_structural_change: true,
            default_packet_size: 1200,
            max_packet_size: 16 * 1024,
            initial_scratch_size: 4096,
            entity_size_prefix: false,
            profile_components: false,
            relevancy_mode: RelevancyMode::Disabled,
        }
    }
}

impl GhostSendConfig {
    /// Creates a configuration with small buffers, so tests hit the
    /// packet-full and scratch-growth paths.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            default_packet_size: 256,
            max_packet_size: 4096,
            initial_scratch_size: 64,
            despawn_grace_ticks: 64,
            ..Self::default()
        }
    }

    /// Wire limits matching this configuration.
    #[must_use]
    pub fn wire_limits(&self) -> wire::Limits {
        wire::Limits {
            max_packet_bytes: self.max_packet_size,
            max_new_types_per_snapshot: self.max_new_types_per_snapshot,
            max_despawns_per_snapshot: self.max_despawns_per_snapshot,
        }
    }

    /// Number of baselines an entity may use.
    #[must_use]
    pub const fn baseline_count(&self) -> usize {
        if self.force_single_baseline {
            1
        } else {
            MAX_BASELINES
        }
    }
}
