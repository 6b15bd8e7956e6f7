//! In-memory device pair that checks resource lifetimes.
//!
//! [`SimUploader`] and [`SimDrawer`] share one [`SimLedger`]. Every
//! allocation, release, drawable and draw is recorded, and anything that
//! would be a use-after-free or double free on a real device is logged as a
//! [`Violation`] instead of crashing.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tilestream_common::{GRID_SLOTS, TileSlot};

use crate::device::{BufferHandle, DrawDevice, DrawableHandle, FenceStatus, UploadDevice};
use crate::error::ResourceError;

/// Source of artificial per-operation latency.
pub type DelaySource = Box<dyn FnMut() -> Duration + Send>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("{0} released twice")]
    DoubleRelease(BufferHandle),
    #[error("release of {0}, which was never allocated")]
    UnknownBuffer(BufferHandle),
    #[error("{buffer} released while {drawable} still references it")]
    ReleasedWhileBound {
        buffer: BufferHandle,
        drawable: DrawableHandle,
    },
    #[error("drawable built on freed {0}")]
    DrawableOnFreedBuffer(BufferHandle),
    #[error("draw of destroyed {0}")]
    DrawOfDestroyedDrawable(DrawableHandle),
    #[error("draw of {drawable} whose {buffer} was freed")]
    DrawOfFreedBuffer {
        drawable: DrawableHandle,
        buffer: BufferHandle,
    },
    #[error("{0} destroyed twice")]
    DoubleDestroy(DrawableHandle),
    #[error("destroy of {0}, which was never created")]
    UnknownDrawable(DrawableHandle),
}

#[derive(Debug)]
struct BufferEntry {
    released: bool,
}

#[derive(Debug)]
struct DrawableEntry {
    buffer: BufferHandle,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: u64,
    buffers: BTreeMap<BufferHandle, BufferEntry>,
    drawables: BTreeMap<DrawableHandle, DrawableEntry>,
    uploads: [u64; GRID_SLOTS],
    draws: [u64; GRID_SLOTS],
    releases: u64,
    destroyed: u64,
    violations: Vec<Violation>,
}

impl LedgerState {
    fn next_raw(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn violation(&mut self, v: Violation) {
        tracing::error!(violation = %v, "simulated device misuse");
        self.violations.push(v);
    }
}

/// Summary of everything a [`SimLedger`] has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReport {
    pub allocations: u64,
    pub releases: u64,
    pub drawables_created: u64,
    pub drawables_destroyed: u64,
    /// Successful buffer allocations per slot.
    pub uploads: [u64; GRID_SLOTS],
    /// Draw calls per slot.
    pub draws: [u64; GRID_SLOTS],
    pub violations: Vec<Violation>,
}

impl LedgerReport {
    pub fn leaked_buffers(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    pub fn leaked_drawables(&self) -> u64 {
        self.drawables_created.saturating_sub(self.drawables_destroyed)
    }

    /// No violations and nothing left allocated.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.leaked_buffers() == 0 && self.leaked_drawables() == 0
    }

    pub fn total_draws(&self) -> u64 {
        self.draws.iter().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimLedger(Arc<Mutex<LedgerState>>);

impl SimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uploader(&self) -> SimUploader {
        SimUploader {
            ledger: self.clone(),
            allocation_attempts: 0,
            fail_allocation_at: None,
            fences: VecDeque::new(),
            delay: None,
        }
    }

    pub fn drawer(&self) -> SimDrawer {
        SimDrawer {
            ledger: self.clone(),
            creation_attempts: 0,
            fail_drawable_at: None,
            delay: None,
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.values().filter(|b| !b.released).count()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.lock().violations.clone()
    }

    pub fn report(&self) -> LedgerReport {
        let state = self.lock();
        LedgerReport {
            allocations: state.buffers.len() as u64,
            releases: state.releases,
            drawables_created: state.drawables.len() as u64,
            drawables_destroyed: state.destroyed,
            uploads: state.uploads,
            draws: state.draws,
            violations: state.violations.clone(),
        }
    }
}

fn sleep_from(delay: &mut Option<DelaySource>) {
    if let Some(source) = delay.as_mut() {
        let d = source();
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Producer-side half of the simulated device.
pub struct SimUploader {
    ledger: SimLedger,
    allocation_attempts: u64,
    fail_allocation_at: Option<u64>,
    fences: VecDeque<FenceStatus>,
    delay: Option<DelaySource>,
}

impl SimUploader {
    /// Make the `n`-th allocation (1-based) fail.
    pub fn fail_allocation_at(mut self, n: u64) -> Self {
        self.fail_allocation_at = Some(n);
        self
    }

    /// Scripted fence results not yet handed out.
    pub fn pending_fences(&self) -> usize {
        self.fences.len()
    }

    /// Fence results handed out in order before falling back to
    /// [`FenceStatus::AlreadySignaled`].
    pub fn script_fences(mut self, results: impl IntoIterator<Item = FenceStatus>) -> Self {
        self.fences.extend(results);
        self
    }

    pub fn with_delay(mut self, source: impl FnMut() -> Duration + Send + 'static) -> Self {
        self.delay = Some(Box::new(source));
        self
    }
}

impl UploadDevice for SimUploader {
    fn create_buffer(
        &mut self,
        slot: TileSlot,
        contents: &[u8],
    ) -> Result<BufferHandle, ResourceError> {
        sleep_from(&mut self.delay);
        self.allocation_attempts += 1;
        if self.fail_allocation_at == Some(self.allocation_attempts) {
            return Err(ResourceError::BufferAllocation {
                slot,
                reason: "simulated out-of-memory".into(),
            });
        }

        let mut state = self.ledger.lock();
        let Some(buffer) = BufferHandle::new(state.next_raw()) else {
            return Err(ResourceError::BufferAllocation {
                slot,
                reason: "handle space exhausted".into(),
            });
        };
        state.buffers.insert(buffer, BufferEntry { released: false });
        state.uploads[slot.index()] += 1;
        tracing::trace!(%slot, %buffer, bytes = contents.len(), "sim buffer allocated");
        Ok(buffer)
    }

    fn wait_uploaded(&mut self, _timeout: Duration) -> FenceStatus {
        sleep_from(&mut self.delay);
        self.fences
            .pop_front()
            .unwrap_or(FenceStatus::AlreadySignaled)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        sleep_from(&mut self.delay);
        let mut guard = self.ledger.lock();
        let state = &mut *guard;
        let bound = state
            .drawables
            .iter()
            .find(|(_, d)| d.buffer == buffer && !d.destroyed)
            .map(|(&h, _)| h);
        let misuse = match state.buffers.get_mut(&buffer) {
            None => Some(Violation::UnknownBuffer(buffer)),
            Some(entry) if entry.released => Some(Violation::DoubleRelease(buffer)),
            Some(entry) => {
                entry.released = true;
                state.releases += 1;
                bound.map(|drawable| Violation::ReleasedWhileBound { buffer, drawable })
            }
        };
        if let Some(v) = misuse {
            state.violation(v);
        }
    }
}

/// The draw target of [`SimDrawer`]: the draws issued during one frame.
#[derive(Debug, Default)]
pub struct SimFrame {
    pub draws: Vec<(TileSlot, DrawableHandle)>,
}

impl SimFrame {
    pub fn clear(&mut self) {
        self.draws.clear();
    }

    pub fn slots(&self) -> Vec<usize> {
        self.draws.iter().map(|(slot, _)| slot.index()).collect()
    }
}

/// Render-side half of the simulated device.
pub struct SimDrawer {
    ledger: SimLedger,
    creation_attempts: u64,
    fail_drawable_at: Option<u64>,
    delay: Option<DelaySource>,
}

impl SimDrawer {
    /// Make the `n`-th drawable creation (1-based) fail.
    pub fn fail_drawable_at(mut self, n: u64) -> Self {
        self.fail_drawable_at = Some(n);
        self
    }

    pub fn with_delay(mut self, source: impl FnMut() -> Duration + Send + 'static) -> Self {
        self.delay = Some(Box::new(source));
        self
    }
}

impl DrawDevice for SimDrawer {
    type Target = SimFrame;

    fn create_drawable(
        &mut self,
        buffer: BufferHandle,
        _vertex_count: u32,
    ) -> Result<DrawableHandle, ResourceError> {
        sleep_from(&mut self.delay);
        self.creation_attempts += 1;
        if self.fail_drawable_at == Some(self.creation_attempts) {
            return Err(ResourceError::DrawableCreation {
                buffer,
                reason: "simulated binding failure".into(),
            });
        }

        let mut state = self.ledger.lock();
        let released = match state.buffers.get(&buffer) {
            None => return Err(ResourceError::UnknownBuffer(buffer)),
            Some(entry) => entry.released,
        };
        if released {
            state.violation(Violation::DrawableOnFreedBuffer(buffer));
        }
        let Some(drawable) = DrawableHandle::new(state.next_raw()) else {
            return Err(ResourceError::DrawableCreation {
                buffer,
                reason: "handle space exhausted".into(),
            });
        };
        state.drawables.insert(
            drawable,
            DrawableEntry {
                buffer,
                destroyed: false,
            },
        );
        Ok(drawable)
    }

    fn destroy_drawable(&mut self, drawable: DrawableHandle) {
        let mut guard = self.ledger.lock();
        let state = &mut *guard;
        let misuse = match state.drawables.get_mut(&drawable) {
            None => Some(Violation::UnknownDrawable(drawable)),
            Some(entry) if entry.destroyed => Some(Violation::DoubleDestroy(drawable)),
            Some(entry) => {
                entry.destroyed = true;
                state.destroyed += 1;
                None
            }
        };
        if let Some(v) = misuse {
            state.violation(v);
        }
    }

    fn draw(
        &mut self,
        target: &mut SimFrame,
        slot: TileSlot,
        drawable: DrawableHandle,
        _vertex_count: u32,
    ) {
        let mut state = self.ledger.lock();
        let backing = match state.drawables.get(&drawable) {
            Some(entry) if !entry.destroyed => Some(entry.buffer),
            _ => None,
        };
        match backing {
            None => state.violation(Violation::DrawOfDestroyedDrawable(drawable)),
            Some(buffer) => {
                let freed = state.buffers.get(&buffer).is_none_or(|b| b.released);
                if freed {
                    state.violation(Violation::DrawOfFreedBuffer { drawable, buffer });
                }
            }
        }
        state.draws[slot.index()] += 1;
        target.draws.push((slot, drawable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: usize) -> TileSlot {
        TileSlot::new(i).unwrap()
    }

    #[test]
    fn clean_lifecycle_leaves_clean_report() {
        let ledger = SimLedger::new();
        let mut up = ledger.uploader();
        let mut drawer = ledger.drawer();
        let mut frame = SimFrame::default();

        let buffer = up.create_buffer(slot(2), &[0; 16]).unwrap();
        let drawable = drawer.create_drawable(buffer, 6).unwrap();
        drawer.draw(&mut frame, slot(2), drawable, 6);
        drawer.destroy_drawable(drawable);
        up.release_buffer(buffer);

        let report = ledger.report();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.uploads[2], 1);
        assert_eq!(report.total_draws(), 1);
        assert_eq!(frame.slots(), vec![2]);
    }

    #[test]
    fn release_while_bound_is_flagged() {
        let ledger = SimLedger::new();
        let mut up = ledger.uploader();
        let mut drawer = ledger.drawer();

        let buffer = up.create_buffer(slot(0), &[]).unwrap();
        let drawable = drawer.create_drawable(buffer, 6).unwrap();
        up.release_buffer(buffer);
        drawer.draw(&mut SimFrame::default(), slot(0), drawable, 6);

        let violations = ledger.violations();
        assert_eq!(
            violations,
            vec![
                Violation::ReleasedWhileBound { buffer, drawable },
                Violation::DrawOfFreedBuffer { drawable, buffer },
            ]
        );
    }

    #[test]
    fn double_frees_are_flagged() {
        let ledger = SimLedger::new();
        let mut up = ledger.uploader();
        let mut drawer = ledger.drawer();

        let buffer = up.create_buffer(slot(1), &[]).unwrap();
        let drawable = drawer.create_drawable(buffer, 6).unwrap();
        drawer.destroy_drawable(drawable);
        drawer.destroy_drawable(drawable);
        up.release_buffer(buffer);
        up.release_buffer(buffer);

        assert_eq!(
            ledger.violations(),
            vec![Violation::DoubleDestroy(drawable), Violation::DoubleRelease(buffer)]
        );
    }

    #[test]
    fn scripted_failures() {
        let ledger = SimLedger::new();
        let mut up = ledger
            .uploader()
            .fail_allocation_at(2)
            .script_fences([FenceStatus::TimeoutExpired]);
        assert!(up.create_buffer(slot(0), &[]).is_ok());
        assert!(matches!(
            up.create_buffer(slot(1), &[]),
            Err(ResourceError::BufferAllocation { .. })
        ));
        assert!(up.create_buffer(slot(1), &[]).is_ok());
        assert_eq!(up.wait_uploaded(Duration::ZERO), FenceStatus::TimeoutExpired);
        assert_eq!(up.wait_uploaded(Duration::ZERO), FenceStatus::AlreadySignaled);

        let buffer = BufferHandle::new(1).unwrap();
        let mut drawer = ledger.drawer().fail_drawable_at(1);
        assert!(drawer.create_drawable(buffer, 6).is_err());
        assert!(drawer.create_drawable(buffer, 6).is_ok());

        let report = ledger.report();
        assert_eq!(report.allocations, 2);
        assert_eq!(report.leaked_buffers(), 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn unknown_buffer_is_rejected() {
        let ledger = SimLedger::new();
        let mut drawer = ledger.drawer();
        let bogus = BufferHandle::new(99).unwrap();
        assert_eq!(
            drawer.create_drawable(bogus, 6),
            Err(ResourceError::UnknownBuffer(bogus))
        );
        ledger.uploader().release_buffer(bogus);
        assert_eq!(ledger.violations(), vec![Violation::UnknownBuffer(bogus)]);
    }
}
