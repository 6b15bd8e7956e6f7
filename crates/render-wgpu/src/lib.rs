//! wgpu backend for the tile stream.
//!
//! [`WgpuUploader`] runs on the producer thread and creates tile vertex
//! buffers; [`WgpuTileDrawer`] runs on the render thread and draws them into
//! a pass opened by [`TilePipeline`]. An [`OrbitCamera`] frames the grid.
//!
//! # Invariants
//! - The drawer never creates or destroys device buffers.
//! - A buffer is destroyed only through [`WgpuUploader`]'s release.

mod camera;
mod device;
mod pipeline;
mod shaders;

pub use camera::OrbitCamera;
pub use device::{BufferRegistry, TileBinding, WgpuTileDrawer, WgpuUploader};
pub use pipeline::TilePipeline;
