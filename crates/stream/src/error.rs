use std::time::Duration;

use tilestream_common::{GridError, TileSlot};

use crate::config::ConfigError;
use crate::device::BufferHandle;
use crate::status::TransitionError;

/// Device resource failures. Recoverable: the affected slot simply stays in
/// its previous state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("buffer allocation for {slot} failed: {reason}")]
    BufferAllocation { slot: TileSlot, reason: String },
    #[error("drawable creation from {buffer} failed: {reason}")]
    DrawableCreation { buffer: BufferHandle, reason: String },
    #[error("unknown buffer handle {0}")]
    UnknownBuffer(BufferHandle),
}

/// Errors surfaced by the streaming subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("upload of {slot} not confirmed after {waited:?}; data may not be resident")]
    UploadTimeout { slot: TileSlot, waited: Duration },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("failed to spawn producer thread: {0}")]
    Spawn(String),
}
