//! Shared grid vocabulary: tile slots on the 3×3 grid, per-tile resolution,
//! and the two double-buffered generations.

mod types;

pub use types::{GRID_DIM, GRID_SLOTS, GenerationId, GridError, TileResolution, TileSlot};
