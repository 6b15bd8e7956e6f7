//! Double-buffered tile streaming between a regeneration thread and the
//! render loop.
//!
//! The producer owns an [`UploadDevice`] and fills the idle generation of a
//! [`SharedGrid`]; the render loop owns a [`DrawDevice`] and, once per frame,
//! swaps to the newest generation, builds and retires drawables and draws.
//!
//! # Invariants
//! - The render loop never waits on the producer.
//! - A buffer is released only after the render loop has acknowledged the
//!   swap to a generation in which that buffer's drawable was destroyed.
//! - A generation is requested only after every slot write to it.
//! - Each handle is freed at most once, by the side that owns it.

mod config;
mod consumer;
mod device;
mod error;
mod generation;
mod handoff;
mod producer;
pub mod sim;
mod stats;
mod status;
mod stream;

pub use config::{ConfigError, MAX_FENCE_RETRIES, RetirementPolicy, StreamConfig};
pub use consumer::{Consumer, FrameReport};
pub use device::{BufferHandle, DrawDevice, DrawableHandle, FenceStatus, UploadDevice};
pub use error::{ResourceError, StreamError};
pub use generation::{Generation, SharedGrid, SlotCell, SlotRecord, SwapIndicator};
pub use handoff::{AckOutcome, Handoff, HandoffReceiver, HandoffSender, HandoffWait, handoff_channel};
pub use producer::{CycleAction, CycleOutcome, Producer, ProducerExit, ProducerState, WaitOutcome};
pub use stats::{ConsumerStats, FrameTimer, ProducerCounters, ProducerStats, StreamStats};
pub use status::{SlotEvent, SlotStatus, TransitionError};
pub use stream::{TeardownReport, TileStream, connect};

pub fn crate_info() -> &'static str {
    "tilestream-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
