//! Core types for the codec.

use std::fmt;

/// A simulation tick number.
///
/// Ticks wrap around; ordering between ticks is only meaningful through
/// [`ticks_since`](Self::ticks_since) and [`is_newer_than`](Self::is_newer_than).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SnapshotTick(u32);

impl SnapshotTick {
    /// Creates a new snapshot tick.
    #[must_use]
    pub const fn new(tick: u32) -> Self {
        Self(tick)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if this tick is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Signed distance from `earlier` to `self`, wrapping.
    #[must_use]
    pub const fn ticks_since(self, earlier: Self) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// Returns `true` if `self` is strictly after `other`.
    #[must_use]
    pub const fn is_newer_than(self, other: Self) -> bool {
        self.ticks_since(other) > 0
    }

    /// Returns the tick `n` ticks later.
    #[must_use]
    pub const fn add(self, n: u32) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

impl From<u32> for SnapshotTick {
    fn from(tick: u32) -> Self {
        Self(tick)
    }
}

impl From<SnapshotTick> for u32 {
    fn from(tick: SnapshotTick) -> Self {
        tick.0
    }
}

impl fmt::Display for SnapshotTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned ghost id.
///
/// Never zero. Negative ids denote prespawned ghosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GhostId(i32);

impl GhostId {
    /// Creates an id, returning `None` for zero.
    #[must_use]
    pub const fn new(id: i32) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns `true` for prespawned ghosts.
    #[must_use]
    pub const fn is_prespawned(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for GhostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ghost id plus the tick it was spawned at.
///
/// Ids are recycled, so bookkeeping that outlives a ghost keys on this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpawnedGhost {
    pub ghost_id: GhostId,
    pub spawn_tick: SnapshotTick,
}

impl SpawnedGhost {
    #[must_use]
    pub const fn new(ghost_id: GhostId, spawn_tick: SnapshotTick) -> Self {
        Self {
            ghost_id,
            spawn_tick,
        }
    }
}

/// Identity of a live server entity: slot index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityStamp {
    pub index: u32,
    pub version: u32,
}

impl EntityStamp {
    #[must_use]
    pub const fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }
}

/// Stable chunk identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// Network id of a connection, as stored in owner fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NetworkId(pub i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tick_wrapping_distance() {
        let before = SnapshotTick::new(u32::MAX - 1);
        let after = SnapshotTick::new(2);
        assert_eq!(after.ticks_since(before), 4);
        assert_eq!(before.ticks_since(after), -4);
        assert!(after.is_newer_than(before));
        assert!(!before.is_newer_than(after));
        assert!(!after.is_newer_than(after));
    }

    #[test]
    fn snapshot_tick_add_wraps() {
        assert_eq!(SnapshotTick::new(u32::MAX).add(2), SnapshotTick::new(1));
    }

    #[test]
    fn snapshot_tick_conversions() {
        let tick: SnapshotTick = 42u32.into();
        assert_eq!(tick.raw(), 42);
        let raw: u32 = tick.into();
        assert_eq!(raw, 42);
        assert!(SnapshotTick::default().is_zero());
    }

    #[test]
    fn ghost_id_never_zero() {
        assert!(GhostId::new(0).is_none());
        assert!(GhostId::new(-3).unwrap().is_prespawned());
        assert!(!GhostId::new(3).unwrap().is_prespawned());
    }

    #[test]
    fn spawned_ghost_distinguishes_recycled_ids() {
        let id = GhostId::new(7).unwrap();
        let first = SpawnedGhost::new(id, SnapshotTick::new(10));
        let second = SpawnedGhost::new(id, SnapshotTick::new(90));
        assert_ne!(first, second);
    }
}
