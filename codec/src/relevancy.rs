//! Relevancy hook consumed by the serializer.

use crate::types::GhostId;

/// Decides which ghosts a connection receives.
pub trait RelevancyFilter {
    /// Returns `true` if `ghost` should be sent to the connection.
    fn is_relevant(&self, ghost: GhostId) -> bool;

    /// Changes whenever the answer of [`is_relevant`](Self::is_relevant)
    /// may have changed.
    fn version(&self) -> u64;
}

/// Every ghost is relevant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRelevant;

impl RelevancyFilter for AllRelevant {
    fn is_relevant(&self, _ghost: GhostId) -> bool {
        true
    }

    fn version(&self) -> u64 {
        0
    }
}
