//! Per-connection snapshot history and the ghost chunk serializer.
//!
//! This crate ties together bitstream, wire and schema. It owns everything
//! that is specific to one connection: the ring of sent records per chunk,
//! acknowledgement tracking, baseline selection, despawn bookkeeping and the
//! delta encoder that writes chunks into a packet.
//!
//! # Features
//!
//! - Up to three acknowledged baselines per entity with linear prediction
//! - Per-field change masks and enable bits
//! - Variable-length buffer components in a dynamic sub-stream
//! - Static optimization for unchanged entities and chunks
//! - Ghost groups serialized inline with their root
//! - Packet-exact fitting with undo of everything that did not fit
//!
//! # Design Principles
//!
//! - **Correctness first** - The sender only ever deltas against what the
//!   client provably holds.
//! - **Undo, don't copy** - Speculative history writes are logged and rolled
//!   back instead of staged.
//! - **Deterministic** - Same world, acks and config produce the same bytes.

mod ack;
mod config;
mod connection;
mod despawn;
mod error;
mod history;
mod ids;
mod mirror;
mod predict;
mod profile;
mod record;
mod relevancy;
mod rollback;
mod scratch;
mod serializer;
mod types;
mod world;

pub use ack::{SnapshotAck, ACK_WINDOW_TICKS};
pub use config::{
    GhostSendConfig, RelevancyMode, MAX_BASELINES, MAX_BASELINE_AGE, MAX_SCRATCH_RETRIES,
    SNAPSHOT_HISTORY_SIZE,
};
pub use connection::{ConnectionCheckpoint, ConnectionState, TypeAnnouncer};
pub use despawn::{DespawnCheckpoint, DespawnKind, DespawnTracker, KnownGhost, PendingDespawn};
pub use error::{SerializeError, SerializeResult, ValueReason};
pub use history::{Baseline, BaselineData, ChunkHistory, ChunkSendState, ConnectionHistory};
pub use ids::IdAllocator;
pub use mirror::{ClientMirror, MirrorError, MirrorGhost, MirrorResult, MirrorUpdate};
pub use predict::DeltaPredictor;
pub use profile::{ComponentProfile, ComponentStats};
pub use record::{decode_field, encode_field, EntityImage, PreSerialized};
pub use relevancy::{AllRelevant, RelevancyFilter};
pub use rollback::{RollbackLog, RollbackMark, RollbackOp};
pub use scratch::ScratchStream;
pub use serializer::{serialize_chunk, ChunkWriteResult, SerializeContext};
pub use types::{ChunkId, EntityStamp, GhostId, NetworkId, SnapshotTick, SpawnedGhost};
pub use wire::Limits as WireLimits;
pub use world::{
    ComponentState, ComponentValue, EntityLocation, FieldValue, GhostChunk, GhostEntity,
    GhostWorld, LinkedEntity,
};
