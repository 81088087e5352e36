//! Per-connection relevancy sets.

use std::collections::HashSet;

use codec::{GhostId, RelevancyFilter};

pub use codec::RelevancyMode;

/// The set of ghosts a connection includes or excludes.
///
/// Every change bumps the version, which invalidates whole-chunk static
/// skipping on the next send.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRelevancy {
    mode: RelevancyMode,
    set: HashSet<GhostId>,
    version: u64,
}

impl ConnectionRelevancy {
    #[must_use]
    pub fn new(mode: RelevancyMode) -> Self {
        Self {
            mode,
            set: HashSet::new(),
            version: 0,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> RelevancyMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RelevancyMode) {
        if self.mode != mode {
            self.mode = mode;
            self.version += 1;
        }
    }

    /// Adds a ghost to the set. Returns `false` if it was already there.
    pub fn insert(&mut self, ghost: GhostId) -> bool {
        let inserted = self.set.insert(ghost);
        if inserted {
            self.version += 1;
        }
        inserted
    }

    /// Removes a ghost from the set. Returns `false` if it was not there.
    pub fn remove(&mut self, ghost: GhostId) -> bool {
        let removed = self.set.remove(&ghost);
        if removed {
            self.version += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.set.is_empty() {
            self.set.clear();
            self.version += 1;
        }
    }

    #[must_use]
    pub fn contains(&self, ghost: GhostId) -> bool {
        self.set.contains(&ghost)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl RelevancyFilter for ConnectionRelevancy {
    fn is_relevant(&self, ghost: GhostId) -> bool {
        match self.mode {
            RelevancyMode::Disabled => true,
            RelevancyMode::SetIsRelevant => self.set.contains(&ghost),
            RelevancyMode::SetIsIrrelevant => !self.set.contains(&ghost),
        }
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ghost(raw: i32) -> GhostId {
        GhostId::new(raw).unwrap()
    }

    #[test]
    fn disabled_mode_ignores_the_set() {
        let mut relevancy = ConnectionRelevancy::new(RelevancyMode::Disabled);
        relevancy.insert(ghost(1));
        assert!(relevancy.is_relevant(ghost(1)));
        assert!(relevancy.is_relevant(ghost(2)));
    }

    #[test]
    fn set_modes_include_or_exclude() {
        let mut relevancy = ConnectionRelevancy::new(RelevancyMode::SetIsRelevant);
        relevancy.insert(ghost(1));
        assert!(relevancy.is_relevant(ghost(1)));
        assert!(!relevancy.is_relevant(ghost(2)));

        relevancy.set_mode(RelevancyMode::SetIsIrrelevant);
        assert!(!relevancy.is_relevant(ghost(1)));
        assert!(relevancy.is_relevant(ghost(2)));
    }

    #[test]
    fn version_moves_only_on_real_changes() {
        let mut relevancy = ConnectionRelevancy::new(RelevancyMode::SetIsRelevant);
        assert_eq!(relevancy.version(), 0);
        assert!(relevancy.insert(ghost(1)));
        assert!(!relevancy.insert(ghost(1)));
        assert_eq!(relevancy.version(), 1);
        assert!(!relevancy.remove(ghost(2)));
        assert_eq!(relevancy.version(), 1);
        relevancy.set_mode(RelevancyMode::SetIsRelevant);
        assert_eq!(relevancy.version(), 1);
        relevancy.clear();
        assert_eq!(relevancy.version(), 2);
        relevancy.clear();
        assert_eq!(relevancy.version(), 2);
        assert!(relevancy.is_empty());
    }
}
