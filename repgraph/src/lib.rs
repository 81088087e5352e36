//! Replication graph: decide what to send, not how.
//!
//! This crate ranks a connection's chunks for the packet being built,
//! applies per-tick chunk and entity budgets, and holds the per-connection
//! relevancy sets consumed by the serializer.

mod prioritizer;
mod relevancy;
mod scaling;

pub use prioritizer::{prioritize, select_within_budget, PrioChunk};
pub use relevancy::{ConnectionRelevancy, RelevancyMode};
pub use scaling::{DistanceScaler, ImportanceScaler, Vec3, DISTANCE_SCALE};
