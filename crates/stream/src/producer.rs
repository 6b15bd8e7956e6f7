//! The regeneration thread.
//!
//! Each cycle copies the live generation into the idle one, regenerates the
//! tile under a cyclic cursor, uploads it, applies the retirement policy and
//! asks the render loop to swap. It then waits for the acknowledgment before
//! releasing any buffer the render loop has let go of.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tilestream_common::{GenerationId, TileSlot};
use tilestream_mesh::TileMeshBuilder;

use crate::config::{RetirementPolicy, StreamConfig};
use crate::device::{BufferHandle, FenceStatus, UploadDevice};
use crate::error::StreamError;
use crate::generation::{SharedGrid, SlotCell};
use crate::handoff::{Handoff, HandoffReceiver, HandoffWait};
use crate::status::SlotStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Generating,
    AwaitingSwap,
}

/// What a cycle did to the slot under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    Uploaded(BufferHandle),
    /// Allocation failed; the slot stays empty and the error was reported.
    UploadFailed,
    /// The slot's drawable was flagged for retirement and will be
    /// re-uploaded next cycle.
    Invalidated,
    /// Nothing to do for the slot in its current state.
    Skipped(SlotStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub slot: TileSlot,
    /// The generation that was prepared and requested.
    pub target: GenerationId,
    pub action: CycleAction,
    /// Slots flagged for retirement this cycle, the cursor slot included.
    pub invalidated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acknowledged {
        generation: GenerationId,
        reclaimed: usize,
    },
    TimedOut,
    Disconnected,
}

/// What the producer hands back when its loop ends.
#[derive(Debug)]
pub struct ProducerExit<U> {
    pub uploader: U,
    /// Buffers allocated and not yet released.
    pub live_buffers: Vec<BufferHandle>,
}

impl<U: UploadDevice> ProducerExit<U> {
    /// Release every remaining buffer. Only call once nothing can draw them.
    pub fn release_all(mut self) -> (U, usize) {
        let count = self.live_buffers.len();
        for buffer in self.live_buffers.drain(..) {
            self.uploader.release_buffer(buffer);
        }
        (self.uploader, count)
    }
}

/// Cyclic slot cursor. The first slot handed out is slot 0.
#[derive(Debug, Default)]
struct SlotCursor {
    current: Option<TileSlot>,
    hold: bool,
}

impl SlotCursor {
    fn advance(&mut self) -> TileSlot {
        let slot = match self.current {
            Some(slot) if self.hold => slot,
            Some(slot) => slot.next(),
            None => TileSlot::FIRST,
        };
        self.hold = false;
        self.current = Some(slot);
        slot
    }

    /// Revisit the current slot on the next advance.
    fn hold(&mut self) {
        self.hold = true;
    }
}

pub struct Producer<U: UploadDevice> {
    grid: Arc<SharedGrid>,
    uploader: U,
    mesh: TileMeshBuilder,
    cursor: SlotCursor,
    config: StreamConfig,
    acks: HandoffReceiver,
    faults: Sender<StreamError>,
    live_buffers: BTreeSet<BufferHandle>,
    state: ProducerState,
}

impl<U: UploadDevice> Producer<U> {
    pub(crate) fn new(
        grid: Arc<SharedGrid>,
        uploader: U,
        config: StreamConfig,
        acks: HandoffReceiver,
        faults: Sender<StreamError>,
    ) -> Self {
        Self {
            grid,
            uploader,
            mesh: TileMeshBuilder::new(config.resolution, config.surface),
            cursor: SlotCursor::default(),
            config,
            acks,
            faults,
            live_buffers: BTreeSet::new(),
            state: ProducerState::Generating,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Run the Generating state: prepare the idle generation, then publish
    /// it as requested. Returns `None` while a swap is still outstanding,
    /// since the idle generation may be about to become live.
    pub fn cycle(&mut self) -> Option<CycleOutcome> {
        if self.state != ProducerState::Generating {
            return None;
        }

        let grid = Arc::clone(&self.grid);
        let active = grid.indicator.active();
        let target = active.other();
        let dst = grid.generation(target);
        dst.copy_from(grid.generation(active));
        grid.counters.cycle();

        let slot = self.cursor.advance();
        let cell = dst.slot(slot);
        let action = match cell.status() {
            SlotStatus::Empty => self.upload(slot, cell),
            SlotStatus::Drawable if self.config.policy == RetirementPolicy::RegeneratedSlot => {
                self.invalidate(slot, cell);
                self.cursor.hold();
                CycleAction::Invalidated
            }
            other => CycleAction::Skipped(other),
        };

        let mut invalidated = usize::from(action == CycleAction::Invalidated);
        if self.config.policy == RetirementPolicy::Eager {
            for other in TileSlot::all() {
                let cell = dst.slot(other);
                if cell.status() == SlotStatus::Drawable && self.invalidate(other, cell) {
                    invalidated += 1;
                }
            }
        }
        grid.counters.invalidated(invalidated);

        grid.indicator.request(target);
        self.state = ProducerState::AwaitingSwap;
        tracing::debug!(%slot, %target, ?action, invalidated, "swap requested");

        Some(CycleOutcome {
            slot,
            target,
            action,
            invalidated,
        })
    }

    /// Run one AwaitingSwap wait. On acknowledgment, buffers whose drawables
    /// the render loop has retired are released and the producer returns to
    /// Generating. A timeout is not an error; the caller simply waits again.
    pub fn await_swap(&mut self, timeout: Duration) -> WaitOutcome {
        match self.acks.wait(timeout) {
            HandoffWait::Received(Handoff::SwapApplied(generation)) => {
                let reclaimed = self.reclaim(generation);
                self.state = ProducerState::Generating;
                tracing::debug!(%generation, reclaimed, "swap acknowledged");
                WaitOutcome::Acknowledged {
                    generation,
                    reclaimed,
                }
            }
            HandoffWait::TimedOut => {
                self.grid.counters.handoff_miss();
                tracing::debug!(?timeout, "handoff wait missed; waiting again");
                WaitOutcome::TimedOut
            }
            HandoffWait::Disconnected => WaitOutcome::Disconnected,
        }
    }

    /// Thread body. Loops until `cancel` is set or the render side hangs up.
    pub fn run(mut self, cancel: &AtomicBool) -> ProducerExit<U> {
        let _span = tracing::info_span!("tile_producer").entered();
        tracing::info!(policy = %self.config.policy, "producer started");

        if pause(self.config.startup_delay(), cancel) {
            while !cancel.load(Ordering::Acquire) {
                match self.state {
                    ProducerState::Generating => {
                        if !pause(self.config.cycle_delay(), cancel) {
                            break;
                        }
                        self.cycle();
                    }
                    ProducerState::AwaitingSwap => {
                        let timeout = self.config.handoff_timeout();
                        if self.await_swap(timeout) == WaitOutcome::Disconnected {
                            tracing::debug!("handoff channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let unread = self.acks.drain();
        if unread > 0 {
            tracing::debug!(unread, "dropping acknowledgments queued at stop");
        }
        tracing::info!(live_buffers = self.live_buffers.len(), "producer stopped");
        self.into_exit()
    }

    pub fn into_exit(self) -> ProducerExit<U> {
        ProducerExit {
            uploader: self.uploader,
            live_buffers: self.live_buffers.into_iter().collect(),
        }
    }

    fn upload(&mut self, slot: TileSlot, cell: &SlotCell) -> CycleAction {
        self.mesh.build(slot);
        let buffer = match self.uploader.create_buffer(slot, self.mesh.bytes()) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.grid.counters.allocation_failure();
                self.report(e.into());
                return CycleAction::UploadFailed;
            }
        };
        self.live_buffers.insert(buffer);
        self.await_fence(slot);

        if let Err(e) = cell.upload(buffer) {
            self.report(e.into());
            return CycleAction::Skipped(cell.status());
        }
        self.grid.counters.upload();
        tracing::debug!(%slot, %buffer, "tile buffer uploaded");
        CycleAction::Uploaded(buffer)
    }

    /// Wait for the upload to be resident. An upload that never confirms is
    /// reported but still published.
    fn await_fence(&mut self, slot: TileSlot) {
        let started = Instant::now();
        let attempts = self.config.fence_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.uploader.wait_uploaded(self.config.fence_timeout()) {
                status if status.is_complete() => {
                    tracing::trace!(%slot, ?status, attempt, "upload fence signalled");
                    return;
                }
                FenceStatus::TimeoutExpired => {
                    tracing::warn!(%slot, attempt, "upload fence wait expired");
                }
                status => {
                    tracing::warn!(%slot, ?status, "upload fence wait failed");
                    break;
                }
            }
        }
        self.grid.counters.upload_timeout();
        self.report(StreamError::UploadTimeout {
            slot,
            waited: started.elapsed(),
        });
    }

    fn invalidate(&mut self, slot: TileSlot, cell: &SlotCell) -> bool {
        match cell.invalidate() {
            Ok(_) => {
                tracing::trace!(%slot, "drawable flagged for retirement");
                true
            }
            Err(e) => {
                self.report(e.into());
                false
            }
        }
    }

    fn reclaim(&mut self, generation: GenerationId) -> usize {
        let grid = Arc::clone(&self.grid);
        let cells = grid.generation(generation);
        let mut reclaimed = 0;
        for slot in TileSlot::all() {
            let cell = cells.slot(slot);
            let record = cell.load();
            if record.status != SlotStatus::DrawableRetired {
                continue;
            }
            if let Some(buffer) = record.buffer {
                self.release(buffer);
            }
            match cell.reclaim() {
                Ok(_) => reclaimed += 1,
                Err(e) => self.report(e.into()),
            }
        }
        grid.counters.released(reclaimed);
        reclaimed
    }

    fn release(&mut self, buffer: BufferHandle) {
        if self.live_buffers.remove(&buffer) {
            self.uploader.release_buffer(buffer);
            tracing::trace!(%buffer, "buffer released");
        } else {
            tracing::warn!(%buffer, "refusing to release a buffer that is not live");
        }
    }

    fn report(&self, err: StreamError) {
        tracing::error!(error = %err, "producer fault");
        let _ = self.faults.send(err);
    }
}

/// Sleep for `total`, checking `cancel` in short slices. Returns `false` if
/// cancelled.
fn pause(total: Duration, cancel: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(25);
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_starts_at_zero_and_wraps() {
        let mut cursor = SlotCursor::default();
        let visited: Vec<usize> = (0..10).map(|_| cursor.advance().index()).collect();
        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn cursor_hold_revisits_once() {
        let mut cursor = SlotCursor::default();
        cursor.advance();
        cursor.advance();
        cursor.hold();
        assert_eq!(cursor.advance().index(), 1);
        assert_eq!(cursor.advance().index(), 2);
    }

    #[test]
    fn unbounded_fence_retries_do_not_overflow() {
        use crate::handoff::handoff_channel;
        use crate::sim::SimLedger;

        let config = StreamConfig {
            resolution: tilestream_common::TileResolution { rows: 3, cols: 3 },
            fence_retries: u32::MAX,
            ..StreamConfig::default()
        };
        let ledger = SimLedger::new();
        let (_ack_tx, ack_rx) = handoff_channel();
        let (fault_tx, fault_rx) = crossbeam_channel::unbounded();
        let mut producer = Producer::new(
            Arc::new(SharedGrid::new()),
            ledger.uploader(),
            config,
            ack_rx,
            fault_tx,
        );

        let outcome = producer.cycle().unwrap();
        assert!(matches!(outcome.action, CycleAction::Uploaded(_)));
        assert!(fault_rx.try_recv().is_err());
    }

    #[test]
    fn pause_respects_cancel() {
        let cancel = AtomicBool::new(true);
        assert!(!pause(Duration::from_secs(10), &cancel));
        let cancel = AtomicBool::new(false);
        assert!(pause(Duration::ZERO, &cancel));
    }
}
