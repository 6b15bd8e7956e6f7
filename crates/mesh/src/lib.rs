//! Tile mesh generation for the streaming grid.
//!
//! # Invariants
//! - Generation is a pure function of (slot, resolution, surface).
//! - Output is written only into caller-owned storage; no device access.

mod tile;

pub use tile::{
    FLOATS_PER_VERTEX, SurfaceParams, TileMeshBuilder, TileVertex, content_hash, generate_tile,
};

pub fn crate_info() -> &'static str {
    "tilestream-mesh v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("mesh"));
    }
}
