use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Producer-side counters. Written by the producer thread, read anywhere.
#[derive(Debug, Default)]
pub struct ProducerCounters {
    cycles: AtomicU64,
    uploads: AtomicU64,
    upload_timeouts: AtomicU64,
    allocation_failures: AtomicU64,
    invalidations: AtomicU64,
    handoff_misses: AtomicU64,
    buffers_released: AtomicU64,
}

impl ProducerCounters {
    pub(crate) fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn upload_timeout(&self) {
        self.upload_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidated(&self, n: usize) {
        self.invalidations.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn handoff_miss(&self) {
        self.handoff_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn released(&self, n: usize) {
        self.buffers_released.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProducerStats {
        ProducerStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            upload_timeouts: self.upload_timeouts.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            handoff_misses: self.handoff_misses.load(Ordering::Relaxed),
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub cycles: u64,
    pub uploads: u64,
    pub upload_timeouts: u64,
    pub allocation_failures: u64,
    pub invalidations: u64,
    pub handoff_misses: u64,
    pub buffers_released: u64,
}

/// Render-side counters, owned by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub frames: u64,
    pub swaps: u64,
    pub drawables_built: u64,
    pub drawables_destroyed: u64,
    pub draws: u64,
    pub acks_dropped: u64,
    /// Draws skipped because the slot named a drawable this consumer no
    /// longer owns.
    pub stale_drawables: u64,
}

/// Combined statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub producer: ProducerStats,
    pub consumer: ConsumerStats,
    /// Average time spent in the per-frame hook over the recent window.
    pub frame_time_avg: Duration,
    pub frame_time_max: Duration,
}

/// Ring buffer of recent per-frame hook durations.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn window(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let window = self.window();
        if window.is_empty() {
            return Duration::ZERO;
        }
        window.iter().sum::<Duration>() / window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled {
            self.capacity
        } else {
            self.index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timer_tracks_history() {
        let mut timer = FrameTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }

    #[test]
    fn frame_timer_wraps_around() {
        let mut timer = FrameTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30)); // overwrites first

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
    }

    #[test]
    fn empty_timer_reports_zero() {
        let timer = FrameTimer::new(0);
        assert_eq!(timer.count(), 0);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }

    #[test]
    fn producer_counters_snapshot() {
        let counters = ProducerCounters::default();
        counters.cycle();
        counters.upload();
        counters.invalidated(3);
        counters.released(2);
        counters.handoff_miss();
        let stats = counters.snapshot();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.invalidations, 3);
        assert_eq!(stats.buffers_released, 2);
        assert_eq!(stats.handoff_misses, 1);
        assert_eq!(stats.upload_timeouts, 0);
    }
}
