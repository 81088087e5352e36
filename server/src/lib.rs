//! Per-connection snapshot scheduler.
//!
//! [`GhostSendSystem`] owns the connections, the ghost id allocator and the
//! shared per-tick images. Every tick it prepares shared state once, then
//! builds and sends one snapshot per connection in parallel.
//!
//! # Features
//!
//! - Despawn propagation and id recycling driven by client acks
//! - Importance-ordered chunks under per-tick chunk and entity budgets
//! - Channel selection by packet size, with doubling retries up to the
//!   configured maximum
//! - Pluggable importance scaling and per-connection relevancy sets
//!
//! # Design Principles
//!
//! - **Isolation** - A failing connection loses its own tick and nothing else.
//! - **Shared reads, owned writes** - Tasks only read the world and registry.
//! - **Transport agnostic** - Packets go through [`wire::SnapshotTransport`].

mod connection;
mod error;
mod report;
mod scheduler;

pub use connection::ServerConnection;
pub use error::{SendError, SendResult};
pub use report::{ComponentBits, ConnectionReport, PacketStats, SendOutcome, TickReport};
pub use scheduler::GhostSendSystem;
