//! Device seams: the producer uploads through [`UploadDevice`], the render
//! loop binds and draws through [`DrawDevice`].

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use tilestream_common::TileSlot;

use crate::error::ResourceError;

/// Device-resident vertex data. Shareable across device contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(NonZeroU64);

/// Context-local binding built from a [`BufferHandle`]. Only valid on the
/// thread that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableHandle(NonZeroU64);

macro_rules! raw_handle {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// Wrap a raw id. Zero is reserved for "no handle".
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            pub fn raw(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

raw_handle!(BufferHandle, "buf");
raw_handle!(DrawableHandle, "draw");

/// Result of waiting on an upload fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The upload had completed before the wait began.
    AlreadySignaled,
    /// The upload completed within the timeout.
    ConditionSatisfied,
    TimeoutExpired,
    WaitFailed,
}

impl FenceStatus {
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            FenceStatus::AlreadySignaled | FenceStatus::ConditionSatisfied
        )
    }
}

/// Producer-side device context: creates and releases vertex buffers.
///
/// Moved onto the producer thread, hence `Send`.
pub trait UploadDevice: Send + 'static {
    /// Upload `contents` into a fresh device buffer for `slot`.
    fn create_buffer(
        &mut self,
        slot: TileSlot,
        contents: &[u8],
    ) -> Result<BufferHandle, ResourceError>;

    /// Block until previously issued uploads are resident, or `timeout` passes.
    fn wait_uploaded(&mut self, timeout: Duration) -> FenceStatus;

    fn release_buffer(&mut self, buffer: BufferHandle);
}

/// Render-side device context: builds drawables and issues draw calls
/// against whatever pipeline state the caller has bound on `Target`.
pub trait DrawDevice {
    type Target;

    fn create_drawable(
        &mut self,
        buffer: BufferHandle,
        vertex_count: u32,
    ) -> Result<DrawableHandle, ResourceError>;

    fn destroy_drawable(&mut self, drawable: DrawableHandle);

    fn draw(
        &mut self,
        target: &mut Self::Target,
        slot: TileSlot,
        drawable: DrawableHandle,
        vertex_count: u32,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(BufferHandle::new(0).is_none());
        assert!(DrawableHandle::new(0).is_none());
        assert_eq!(BufferHandle::new(7).map(BufferHandle::raw), Some(7));
    }

    #[test]
    fn handle_display() {
        assert_eq!(BufferHandle::new(3).unwrap().to_string(), "buf#3");
        assert_eq!(DrawableHandle::new(12).unwrap().to_string(), "draw#12");
    }

    #[test]
    fn fence_completion() {
        assert!(FenceStatus::AlreadySignaled.is_complete());
        assert!(FenceStatus::ConditionSatisfied.is_complete());
        assert!(!FenceStatus::TimeoutExpired.is_complete());
        assert!(!FenceStatus::WaitFailed.is_complete());
    }
}
