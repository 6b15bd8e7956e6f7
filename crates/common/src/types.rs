use std::fmt;

use glam::IVec2;
use serde::{Deserialize, Serialize};

/// Tiles per grid edge.
pub const GRID_DIM: usize = 3;

/// Number of slots in the logical tile grid.
pub const GRID_SLOTS: usize = GRID_DIM * GRID_DIM;

/// Errors from constructing grid values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("slot index {0} out of range (grid has 9 slots)")]
    SlotOutOfRange(usize),
    #[error("tile resolution {rows}x{cols} too small: both edges need at least 2 samples")]
    ResolutionTooSmall { rows: u32, cols: u32 },
}

/// One of the 9 fixed positions on the 3×3 grid.
///
/// Slots carry no identity beyond their index; row-major, so slot 0 is the
/// lower-left tile and slot 8 the upper-right one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct TileSlot(u8);

impl TileSlot {
    pub const FIRST: TileSlot = TileSlot(0);

    pub fn new(index: usize) -> Result<Self, GridError> {
        if index < GRID_SLOTS {
            Ok(Self(index as u8))
        } else {
            Err(GridError::SlotOutOfRange(index))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn row(self) -> usize {
        self.index() / GRID_DIM
    }

    pub fn col(self) -> usize {
        self.index() % GRID_DIM
    }

    /// Placement of this tile relative to the centre tile, each axis in {-1, 0, 1}.
    pub fn offset(self) -> IVec2 {
        IVec2::new(self.col() as i32 - 1, self.row() as i32 - 1)
    }

    /// The slot after this one, wrapping from 8 back to 0.
    pub fn next(self) -> Self {
        Self(((self.index() + 1) % GRID_SLOTS) as u8)
    }

    /// All slots in index order.
    pub fn all() -> impl Iterator<Item = TileSlot> {
        (0..GRID_SLOTS as u8).map(TileSlot)
    }
}

impl TryFrom<usize> for TileSlot {
    type Error = GridError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl From<TileSlot> for usize {
    fn from(slot: TileSlot) -> usize {
        slot.index()
    }
}

impl fmt::Display for TileSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Samples along each edge of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileResolution {
    pub rows: u32,
    pub cols: u32,
}

impl Default for TileResolution {
    fn default() -> Self {
        Self {
            rows: 110,
            cols: 110,
        }
    }
}

impl TileResolution {
    pub fn new(rows: u32, cols: u32) -> Result<Self, GridError> {
        let res = Self { rows, cols };
        res.validate()?;
        Ok(res)
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.rows < 2 || self.cols < 2 {
            return Err(GridError::ResolutionTooSmall {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Quads per tile; each is drawn as two triangles.
    pub fn quad_count(&self) -> usize {
        (self.rows.saturating_sub(1) as usize) * (self.cols.saturating_sub(1) as usize)
    }

    pub fn vertex_count(&self) -> usize {
        6 * self.quad_count()
    }
}

/// Which of the two double-buffered generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationId {
    Zero,
    One,
}

impl GenerationId {
    pub fn index(self) -> usize {
        match self {
            GenerationId::Zero => 0,
            GenerationId::One => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index & 1 == 0 {
            GenerationId::Zero
        } else {
            GenerationId::One
        }
    }

    pub fn other(self) -> Self {
        match self {
            GenerationId::Zero => GenerationId::One,
            GenerationId::One => GenerationId::Zero,
        }
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_offsets_cover_grid() {
        let offsets: Vec<IVec2> = TileSlot::all().map(TileSlot::offset).collect();
        assert_eq!(offsets.len(), GRID_SLOTS);
        assert_eq!(offsets[0], IVec2::new(-1, -1));
        assert_eq!(offsets[4], IVec2::ZERO);
        assert_eq!(offsets[5], IVec2::new(1, 0));
        assert_eq!(offsets[7], IVec2::new(0, 1));
        assert_eq!(offsets[8], IVec2::new(1, 1));
    }

    #[test]
    fn slot_rejects_out_of_range() {
        assert!(TileSlot::new(8).is_ok());
        assert_eq!(TileSlot::new(9), Err(GridError::SlotOutOfRange(9)));
    }

    #[test]
    fn slot_next_wraps() {
        let last = TileSlot::new(8).unwrap();
        assert_eq!(last.next().index(), 0);
        assert_eq!(TileSlot::new(3).unwrap().next().index(), 4);
    }

    #[test]
    fn resolution_counts() {
        let res = TileResolution::new(3, 4).unwrap();
        assert_eq!(res.quad_count(), 6);
        assert_eq!(res.vertex_count(), 36);

        let default = TileResolution::default();
        assert_eq!(default.vertex_count(), 6 * 109 * 109);
    }

    #[test]
    fn resolution_too_small() {
        assert!(matches!(
            TileResolution::new(1, 10),
            Err(GridError::ResolutionTooSmall { rows: 1, cols: 10 })
        ));
    }

    #[test]
    fn generation_other_flips() {
        assert_eq!(GenerationId::Zero.other(), GenerationId::One);
        assert_eq!(GenerationId::One.other().other(), GenerationId::One);
        assert_eq!(GenerationId::from_index(3), GenerationId::One);
    }

    #[test]
    fn slot_serde_uses_index() {
        let slot = TileSlot::new(5).unwrap();
        assert_eq!(usize::from(slot), 5);
        assert!(TileSlot::try_from(12usize).is_err());
    }
}
