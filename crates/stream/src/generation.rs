//! Double-buffered slot records shared between the producer and the render
//! loop.
//!
//! There is no lock around the records. Each slot cell is written by exactly
//! one side at a time (the producer on the inactive generation and on
//! retired slots, the consumer on the active generation's pending slots), and
//! publication uses release/acquire pairs: handles are stored before the
//! status, and a generation is only requested after all of its slot writes.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tilestream_common::{GRID_SLOTS, GenerationId, TileSlot};

use crate::device::{BufferHandle, DrawableHandle};
use crate::stats::ProducerCounters;
use crate::status::{SlotEvent, SlotStatus, TransitionError};

/// Plain copy of one slot cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub status: SlotStatus,
    pub buffer: Option<BufferHandle>,
    pub drawable: Option<DrawableHandle>,
}

impl Default for SlotRecord {
    fn default() -> Self {
        Self {
            status: SlotStatus::Empty,
            buffer: None,
            drawable: None,
        }
    }
}

#[derive(Debug)]
pub struct SlotCell {
    status: AtomicU8,
    buffer: AtomicU64,
    drawable: AtomicU64,
}

impl Default for SlotCell {
    fn default() -> Self {
        Self {
            status: AtomicU8::new(SlotStatus::Empty.raw()),
            buffer: AtomicU64::new(0),
            drawable: AtomicU64::new(0),
        }
    }
}

impl SlotCell {
    pub fn status(&self) -> SlotStatus {
        SlotStatus::from_raw(self.status.load(Ordering::Acquire)).unwrap_or(SlotStatus::Empty)
    }

    pub fn load(&self) -> SlotRecord {
        let status = self.status();
        SlotRecord {
            status,
            buffer: BufferHandle::new(self.buffer.load(Ordering::Relaxed)),
            drawable: DrawableHandle::new(self.drawable.load(Ordering::Relaxed)),
        }
    }

    pub fn store(&self, record: SlotRecord) {
        self.buffer
            .store(record.buffer.map_or(0, BufferHandle::raw), Ordering::Relaxed);
        self.drawable.store(
            record.drawable.map_or(0, DrawableHandle::raw),
            Ordering::Relaxed,
        );
        self.status.store(record.status.raw(), Ordering::Release);
    }

    /// Run one state-machine step, attaching or detaching handles as the
    /// event implies. On error the cell is left untouched.
    fn transition(
        &self,
        event: SlotEvent,
        edit: impl FnOnce(&mut SlotRecord),
    ) -> Result<SlotRecord, TransitionError> {
        let mut record = self.load();
        record.status = record.status.next(event)?;
        edit(&mut record);
        self.store(record);
        Ok(record)
    }

    pub fn upload(&self, buffer: BufferHandle) -> Result<SlotRecord, TransitionError> {
        self.transition(SlotEvent::Uploaded, |r| {
            r.buffer = Some(buffer);
            r.drawable = None;
        })
    }

    pub fn bind(&self, drawable: DrawableHandle) -> Result<SlotRecord, TransitionError> {
        self.transition(SlotEvent::Bound, |r| r.drawable = Some(drawable))
    }

    pub fn invalidate(&self) -> Result<SlotRecord, TransitionError> {
        self.transition(SlotEvent::Invalidated, |_| {})
    }

    pub fn unbind(&self) -> Result<SlotRecord, TransitionError> {
        self.transition(SlotEvent::Unbound, |r| r.drawable = None)
    }

    pub fn reclaim(&self) -> Result<SlotRecord, TransitionError> {
        self.transition(SlotEvent::Reclaimed, |r| r.buffer = None)
    }
}

/// One complete snapshot of the grid's resource state.
#[derive(Debug, Default)]
pub struct Generation {
    slots: [SlotCell; GRID_SLOTS],
}

impl Generation {
    pub fn slot(&self, slot: TileSlot) -> &SlotCell {
        &self.slots[slot.index()]
    }

    /// Overwrite every slot with the matching record of `source`.
    pub fn copy_from(&self, source: &Generation) {
        for (dst, src) in self.slots.iter().zip(source.slots.iter()) {
            dst.store(src.load());
        }
    }

    pub fn records(&self) -> [SlotRecord; GRID_SLOTS] {
        std::array::from_fn(|i| self.slots[i].load())
    }

    pub fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status() == status).count()
    }
}

/// The `active`/`requested` pair. The producer writes only `requested`; the
/// consumer writes only `active`, and only ever to the requested value.
#[derive(Debug, Default)]
pub struct SwapIndicator {
    active: AtomicU8,
    requested: AtomicU8,
}

impl SwapIndicator {
    pub fn active(&self) -> GenerationId {
        GenerationId::from_index(self.active.load(Ordering::Acquire) as usize)
    }

    pub fn requested(&self) -> GenerationId {
        GenerationId::from_index(self.requested.load(Ordering::Acquire) as usize)
    }

    /// Producer side: publish `generation` as the one to draw next.
    pub fn request(&self, generation: GenerationId) {
        self.requested
            .store(generation.index() as u8, Ordering::Release);
    }

    /// Consumer side: make the requested generation active if it differs.
    /// Returns the newly active generation when a swap happened.
    pub fn apply(&self) -> Option<GenerationId> {
        let requested = self.requested.load(Ordering::Acquire);
        if requested == self.active.load(Ordering::Relaxed) {
            return None;
        }
        self.active.store(requested, Ordering::Release);
        Some(GenerationId::from_index(requested as usize))
    }

    pub fn swap_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire) != self.active.load(Ordering::Acquire)
    }
}

/// Everything both threads touch, owned once and passed around by `Arc`.
#[derive(Debug, Default)]
pub struct SharedGrid {
    generations: [Generation; 2],
    pub indicator: SwapIndicator,
    pub counters: ProducerCounters,
}

impl SharedGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self, id: GenerationId) -> &Generation {
        &self.generations[id.index()]
    }

    pub fn active_generation(&self) -> (GenerationId, &Generation) {
        let id = self.indicator.active();
        (id, self.generation(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(raw: u64) -> BufferHandle {
        BufferHandle::new(raw).unwrap()
    }

    fn drawable(raw: u64) -> DrawableHandle {
        DrawableHandle::new(raw).unwrap()
    }

    #[test]
    fn new_grid_is_empty_and_settled() {
        let grid = SharedGrid::new();
        assert_eq!(grid.indicator.active(), GenerationId::Zero);
        assert!(!grid.indicator.swap_pending());
        for id in [GenerationId::Zero, GenerationId::One] {
            assert_eq!(grid.generation(id).count(SlotStatus::Empty), GRID_SLOTS);
        }
    }

    #[test]
    fn cell_lifecycle_tracks_handles() {
        let cell = SlotCell::default();
        let r = cell.upload(buf(5)).unwrap();
        assert_eq!(r.status, SlotStatus::BufferReady);
        assert_eq!(r.buffer, Some(buf(5)));

        let r = cell.bind(drawable(9)).unwrap();
        assert_eq!(r.drawable, Some(drawable(9)));

        cell.invalidate().unwrap();
        let r = cell.unbind().unwrap();
        assert_eq!(r.status, SlotStatus::DrawableRetired);
        assert_eq!(r.drawable, None);
        assert_eq!(r.buffer, Some(buf(5)));

        let r = cell.reclaim().unwrap();
        assert_eq!(r, SlotRecord::default());
    }

    #[test]
    fn illegal_transition_leaves_cell_untouched() {
        let cell = SlotCell::default();
        cell.upload(buf(1)).unwrap();
        assert!(cell.upload(buf(2)).is_err());
        assert_eq!(cell.load().buffer, Some(buf(1)));
        assert!(cell.reclaim().is_err());
        assert_eq!(cell.status(), SlotStatus::BufferReady);
    }

    #[test]
    fn copy_duplicates_all_records() {
        let grid = SharedGrid::new();
        let src = grid.generation(GenerationId::Zero);
        let dst = grid.generation(GenerationId::One);
        let slot = TileSlot::new(3).unwrap();
        src.slot(slot).upload(buf(11)).unwrap();
        src.slot(slot).bind(drawable(12)).unwrap();

        dst.copy_from(src);
        assert_eq!(dst.records(), src.records());
        assert_eq!(dst.slot(slot).status(), SlotStatus::Drawable);
    }

    #[test]
    fn swap_apply_is_idempotent() {
        let indicator = SwapIndicator::default();
        indicator.request(GenerationId::One);
        assert!(indicator.swap_pending());
        assert_eq!(indicator.apply(), Some(GenerationId::One));
        assert_eq!(indicator.apply(), None);
        assert_eq!(indicator.active(), GenerationId::One);
        assert!(!indicator.swap_pending());
    }

    #[test]
    fn repeated_request_of_active_is_noop() {
        let indicator = SwapIndicator::default();
        indicator.request(GenerationId::Zero);
        assert_eq!(indicator.apply(), None);
        assert_eq!(indicator.active(), GenerationId::Zero);
    }
}
