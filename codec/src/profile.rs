//! Per-component bit accounting.

use std::collections::BTreeMap;

use schema::GhostTypeIndex;

/// Bits written for one component of one ghost type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentStats {
    pub bits: u64,
    /// Entities the component was written for.
    pub writes: u64,
}

/// Per-component totals for one connection tick.
#[derive(Debug, Clone, Default)]
pub struct ComponentProfile {
    stats: BTreeMap<(GhostTypeIndex, usize), ComponentStats>,
}

impl ComponentProfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `bits` for component position `component` of `ghost_type`.
    pub fn record(&mut self, ghost_type: GhostTypeIndex, component: usize, bits: usize) {
        let entry = self.stats.entry((ghost_type, component)).or_default();
        entry.bits += bits as u64;
        entry.writes += 1;
    }

    /// Iterates totals ordered by type then component.
    pub fn iter(&self) -> impl Iterator<Item = (GhostTypeIndex, usize, ComponentStats)> + '_ {
        self.stats
            .iter()
            .map(|(&(ghost_type, component), &stats)| (ghost_type, component, stats))
    }

    /// Sum of all recorded bits.
    #[must_use]
    pub fn total_bits(&self) -> u64 {
        self.stats.values().map(|s| s.bits).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn clear(&mut self) {
        self.stats.clear();
    }
}
