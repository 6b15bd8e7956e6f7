//! The render-side half of the protocol, run once per frame.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tilestream_common::{GRID_SLOTS, GenerationId, TileSlot};

use crate::device::{DrawDevice, DrawableHandle};
use crate::error::StreamError;
use crate::generation::{SharedGrid, SlotCell, SlotRecord};
use crate::handoff::{AckOutcome, HandoffSender};
use crate::stats::{ConsumerStats, FrameTimer, StreamStats};
use crate::status::SlotStatus;

const FRAME_HISTORY: usize = 120;

/// What one call of [`Consumer::advance_and_draw`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Generation made active at the start of this frame, if any.
    pub swapped: Option<GenerationId>,
    pub built: usize,
    pub retired: usize,
    pub drawn: usize,
}

pub struct Consumer {
    grid: Arc<SharedGrid>,
    acks: Option<HandoffSender>,
    faults: Receiver<StreamError>,
    vertex_count: u32,
    live_drawables: BTreeSet<DrawableHandle>,
    stats: ConsumerStats,
    timer: FrameTimer,
}

impl Consumer {
    pub(crate) fn new(
        grid: Arc<SharedGrid>,
        acks: HandoffSender,
        faults: Receiver<StreamError>,
        vertex_count: u32,
    ) -> Self {
        Self {
            grid,
            acks: Some(acks),
            faults,
            vertex_count,
            live_drawables: BTreeSet::new(),
            stats: ConsumerStats::default(),
            timer: FrameTimer::new(FRAME_HISTORY),
        }
    }

    /// Per-frame hook. Call after the caller has bound its pipeline and view
    /// state on `target`.
    ///
    /// Applies a pending swap, builds drawables for freshly uploaded slots,
    /// destroys retired ones, draws everything drawable, then acknowledges
    /// the swap. Errors never cut the sweep short or suppress the
    /// acknowledgment; the first one is returned afterwards. A clean frame
    /// returns one queued producer fault, if any.
    ///
    /// Slots are only written in a frame that applied a swap: that is the
    /// one window in which the producer is guaranteed to be parked waiting
    /// for the acknowledgment. Other frames just draw.
    pub fn advance_and_draw<D: DrawDevice>(
        &mut self,
        device: &mut D,
        target: &mut D::Target,
    ) -> Result<FrameReport, StreamError> {
        let _span = tracing::trace_span!("advance_and_draw").entered();
        let started = Instant::now();

        let grid = Arc::clone(&self.grid);
        let swapped = grid.indicator.apply();
        let (active, cells) = grid.active_generation();
        if let Some(generation) = swapped {
            tracing::debug!(%generation, "rendering swapped generation");
        }

        let mut report = FrameReport {
            swapped,
            ..FrameReport::default()
        };
        let mut first_error: Option<StreamError> = None;

        for slot in TileSlot::all() {
            let cell = cells.slot(slot);
            let record = cell.load();
            let step = match record.status {
                _ if swapped.is_none() => Ok(()),
                SlotStatus::BufferReady => self
                    .finalize(device, slot, cell, record)
                    .map(|()| report.built += 1),
                SlotStatus::MarkedForRetirement => self
                    .retire(device, slot, cell, record)
                    .map(|()| report.retired += 1),
                _ => Ok(()),
            };
            if let Err(e) = step {
                tracing::warn!(%slot, error = %e, "slot update failed");
                first_error.get_or_insert(e);
            }

            let record = cell.load();
            if record.status != SlotStatus::Drawable {
                continue;
            }
            match record.drawable {
                Some(drawable) if self.live_drawables.contains(&drawable) => {
                    device.draw(target, slot, drawable, self.vertex_count);
                    report.drawn += 1;
                }
                other => {
                    self.stats.stale_drawables += 1;
                    tracing::error!(%slot, generation = %active, drawable = ?other, "skipping draw of a drawable not owned by this consumer");
                }
            }
        }

        if let Some(generation) = swapped {
            self.stats.swaps += 1;
            self.acknowledge(generation);
        }

        self.stats.frames += 1;
        self.stats.draws += report.drawn as u64;
        self.timer.record(started.elapsed());

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Ok(fault) = self.faults.try_recv() {
            return Err(fault);
        }
        Ok(report)
    }

    /// Stop acknowledging swaps. Any producer waiting on the handoff wakes
    /// up immediately with a disconnect.
    pub fn disconnect(&mut self) {
        self.acks = None;
    }

    /// Destroy every drawable this consumer still owns. Returns how many.
    pub fn destroy_all<D: DrawDevice>(&mut self, device: &mut D) -> usize {
        let count = self.live_drawables.len();
        for drawable in std::mem::take(&mut self.live_drawables) {
            device.destroy_drawable(drawable);
        }
        self.stats.drawables_destroyed += count as u64;
        count
    }

    pub fn live_drawable_count(&self) -> usize {
        self.live_drawables.len()
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn frame_timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn grid(&self) -> &Arc<SharedGrid> {
        &self.grid
    }

    /// Snapshot of both sides' counters plus recent hook timings.
    pub fn stream_stats(&self) -> StreamStats {
        StreamStats {
            producer: self.grid.counters.snapshot(),
            consumer: self.stats.clone(),
            frame_time_avg: self.timer.average(),
            frame_time_max: self.timer.max(),
        }
    }

    /// Records of the generation currently being drawn.
    pub fn active_records(&self) -> (GenerationId, [SlotRecord; GRID_SLOTS]) {
        let (id, cells) = self.grid.active_generation();
        (id, cells.records())
    }

    fn finalize<D: DrawDevice>(
        &mut self,
        device: &mut D,
        slot: TileSlot,
        cell: &SlotCell,
        record: SlotRecord,
    ) -> Result<(), StreamError> {
        let Some(buffer) = record.buffer else {
            tracing::warn!(%slot, "buffer-ready slot without a buffer handle");
            return Ok(());
        };
        let drawable = device.create_drawable(buffer, self.vertex_count)?;
        if let Err(e) = cell.bind(drawable) {
            device.destroy_drawable(drawable);
            return Err(e.into());
        }
        self.live_drawables.insert(drawable);
        self.stats.drawables_built += 1;
        tracing::trace!(%slot, %buffer, %drawable, "drawable built");
        Ok(())
    }

    fn retire<D: DrawDevice>(
        &mut self,
        device: &mut D,
        slot: TileSlot,
        cell: &SlotCell,
        record: SlotRecord,
    ) -> Result<(), StreamError> {
        match record.drawable {
            Some(drawable) if self.live_drawables.remove(&drawable) => {
                device.destroy_drawable(drawable);
                self.stats.drawables_destroyed += 1;
                tracing::trace!(%slot, %drawable, "drawable destroyed");
            }
            other => {
                tracing::warn!(%slot, drawable = ?other, "retired slot had no live drawable");
            }
        }
        cell.unbind()?;
        Ok(())
    }

    fn acknowledge(&mut self, generation: GenerationId) {
        let Some(acks) = &self.acks else {
            tracing::debug!(%generation, "swap applied with no producer listening");
            return;
        };
        match acks.acknowledge(generation) {
            AckOutcome::Sent => {}
            AckOutcome::Full => {
                self.stats.acks_dropped += 1;
                tracing::warn!(%generation, "handoff channel full; acknowledgment dropped");
            }
            AckOutcome::Disconnected => {
                tracing::debug!(%generation, "producer gone; acknowledgment dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferHandle;
    use crate::handoff::handoff_channel;
    use crate::sim::{SimFrame, SimLedger};

    fn consumer() -> (Consumer, crate::handoff::HandoffReceiver) {
        let grid = Arc::new(SharedGrid::new());
        let (tx, rx) = handoff_channel();
        let (_faults_tx, faults_rx) = crossbeam_channel::unbounded();
        (Consumer::new(grid, tx, faults_rx, 6), rx)
    }

    #[test]
    fn idle_frame_draws_nothing_and_sends_nothing() {
        let (mut consumer, acks) = consumer();
        let ledger = SimLedger::new();
        let mut frame = SimFrame::default();

        let report = consumer
            .advance_and_draw(&mut ledger.drawer(), &mut frame)
            .unwrap();
        assert_eq!(report, FrameReport::default());
        assert_eq!(acks.drain(), 0);
        assert_eq!(consumer.stats().frames, 1);
    }

    #[test]
    fn foreign_drawable_is_never_drawn() {
        let (mut consumer, _acks) = consumer();
        let ledger = SimLedger::new();
        let mut frame = SimFrame::default();

        let cell = consumer.grid().generation(GenerationId::Zero).slot(TileSlot::FIRST);
        cell.upload(BufferHandle::new(40).unwrap()).unwrap();
        cell.bind(DrawableHandle::new(41).unwrap()).unwrap();

        let report = consumer
            .advance_and_draw(&mut ledger.drawer(), &mut frame)
            .unwrap();
        assert_eq!(report.drawn, 0);
        assert!(frame.draws.is_empty());
        assert_eq!(consumer.stats().stale_drawables, 1);
    }

    #[test]
    fn disconnected_consumer_still_swaps() {
        let (mut consumer, acks) = consumer();
        consumer.disconnect();
        consumer.grid().indicator.request(GenerationId::One);

        let ledger = SimLedger::new();
        let report = consumer
            .advance_and_draw(&mut ledger.drawer(), &mut SimFrame::default())
            .unwrap();
        assert_eq!(report.swapped, Some(GenerationId::One));
        assert_eq!(acks.wait(std::time::Duration::ZERO), crate::handoff::HandoffWait::Disconnected);
    }
}
