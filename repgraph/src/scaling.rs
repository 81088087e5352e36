//! Importance scaling hook and a distance-based implementation.

use std::collections::HashMap;

use codec::{ChunkId, GhostChunk, NetworkId};

/// Fixed-point factor applied by [`DistanceScaler`].
///
/// A chunk in the viewer's own tile keeps `importance * DISTANCE_SCALE`.
pub const DISTANCE_SCALE: u32 = 256;

/// Rescales a chunk's priority for one connection.
///
/// Called from the per-connection tasks, so implementations must be
/// shareable across threads.
pub trait ImportanceScaler: Sync {
    fn scale(&self, connection: NetworkId, chunk: &GhostChunk, importance: u32) -> u32;
}

/// Basic 3D vector for spatial queries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn distance_sq(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Scales importance down with the tile distance between a connection's
/// viewer and a chunk's center.
///
/// The result is `importance * DISTANCE_SCALE / (1 + tiles^2)`. Chunks
/// without a known center and connections without a viewer keep the
/// near-tile value.
#[derive(Debug, Clone)]
pub struct DistanceScaler {
    tile_size: f32,
    viewers: HashMap<NetworkId, Vec3>,
    chunk_centers: HashMap<ChunkId, Vec3>,
}

impl DistanceScaler {
    #[must_use]
    pub fn new(tile_size: f32) -> Self {
        Self {
            tile_size: tile_size.max(f32::EPSILON),
            viewers: HashMap::new(),
            chunk_centers: HashMap::new(),
        }
    }

    pub fn set_viewer(&mut self, connection: NetworkId, position: Vec3) {
        self.viewers.insert(connection, position);
    }

    pub fn remove_viewer(&mut self, connection: NetworkId) {
        self.viewers.remove(&connection);
    }

    pub fn set_chunk_center(&mut self, chunk: ChunkId, center: Vec3) {
        self.chunk_centers.insert(chunk, center);
    }

    /// Tile distance between a connection's viewer and a chunk.
    #[must_use]
    pub fn tiles(&self, connection: NetworkId, chunk: ChunkId) -> u32 {
        let (Some(viewer), Some(center)) =
            (self.viewers.get(&connection), self.chunk_centers.get(&chunk))
        else {
            return 0;
        };
        let tiles = viewer.distance_sq(*center).sqrt() / self.tile_size;
        tiles.min(u16::MAX as f32) as u32
    }
}

impl ImportanceScaler for DistanceScaler {
    fn scale(&self, connection: NetworkId, chunk: &GhostChunk, importance: u32) -> u32 {
        let tiles = u64::from(self.tiles(connection, chunk.id));
        let scaled = u64::from(importance) * u64::from(DISTANCE_SCALE) / (1 + tiles * tiles);
        scaled.min(u64::from(u32::MAX)) as u32
    }
}
