//! wgpu implementations of the stream's device seams.
//!
//! Buffers are created by the producer thread through [`WgpuUploader`] and
//! parked in a shared [`BufferRegistry`]. The render thread's
//! [`WgpuTileDrawer`] turns registry entries into its own bindings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tilestream_common::TileSlot;
use tilestream_mesh::TileVertex;
use tilestream_stream::{
    BufferHandle, DrawDevice, DrawableHandle, FenceStatus, ResourceError, UploadDevice,
};

const FENCE_POLL: Duration = Duration::from_millis(1);

/// Device buffers shared between the upload and render threads.
#[derive(Debug, Clone, Default)]
pub struct BufferRegistry {
    buffers: Arc<Mutex<BTreeMap<BufferHandle, Arc<wgpu::Buffer>>>>,
    next_id: Arc<AtomicU64>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<BufferHandle, Arc<wgpu::Buffer>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, buffer: wgpu::Buffer) -> Option<BufferHandle> {
        let handle = BufferHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)?;
        self.lock().insert(handle, Arc::new(buffer));
        Some(handle)
    }

    pub fn get(&self, handle: BufferHandle) -> Option<Arc<wgpu::Buffer>> {
        self.lock().get(&handle).cloned()
    }

    fn remove(&self, handle: BufferHandle) -> Option<Arc<wgpu::Buffer>> {
        self.lock().remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer-side device context.
pub struct WgpuUploader {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    registry: BufferRegistry,
}

impl WgpuUploader {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, registry: BufferRegistry) -> Self {
        Self {
            device,
            queue,
            registry,
        }
    }
}

impl UploadDevice for WgpuUploader {
    fn create_buffer(
        &mut self,
        slot: TileSlot,
        contents: &[u8],
    ) -> Result<BufferHandle, ResourceError> {
        if contents.is_empty() {
            return Err(ResourceError::BufferAllocation {
                slot,
                reason: "no vertex data".into(),
            });
        }
        let size = (contents.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tile_vertex_buffer"),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, contents);
        self.queue.submit(std::iter::empty());

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            buffer.destroy();
            return Err(ResourceError::BufferAllocation {
                slot,
                reason: err.to_string(),
            });
        }

        let Some(handle) = self.registry.insert(buffer) else {
            return Err(ResourceError::BufferAllocation {
                slot,
                reason: "buffer id space exhausted".into(),
            });
        };
        tracing::trace!(%slot, %handle, size, "tile buffer created");
        Ok(handle)
    }

    fn wait_uploaded(&mut self, timeout: Duration) -> FenceStatus {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        let deadline = Instant::now() + timeout;
        let _ = self.device.poll(wgpu::Maintain::Poll);
        if done.load(Ordering::Acquire) {
            return FenceStatus::AlreadySignaled;
        }
        loop {
            if Instant::now() >= deadline {
                return FenceStatus::TimeoutExpired;
            }
            std::thread::sleep(FENCE_POLL);
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if done.load(Ordering::Acquire) {
                return FenceStatus::ConditionSatisfied;
            }
        }
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        match self.registry.remove(buffer) {
            Some(b) => b.destroy(),
            None => tracing::warn!(%buffer, "release of unregistered tile buffer"),
        }
    }
}

/// A drawable: the render thread's own reference to a tile buffer.
#[derive(Debug)]
pub struct TileBinding {
    buffer: Arc<wgpu::Buffer>,
    vertex_count: u32,
}

/// Render-side device context. Draws into a pass opened by
/// [`TilePipeline::begin_pass`](crate::TilePipeline::begin_pass).
#[derive(Debug)]
pub struct WgpuTileDrawer {
    registry: BufferRegistry,
    bindings: BTreeMap<DrawableHandle, TileBinding>,
    next_id: u64,
}

impl WgpuTileDrawer {
    pub fn new(registry: BufferRegistry) -> Self {
        Self {
            registry,
            bindings: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl DrawDevice for WgpuTileDrawer {
    type Target = wgpu::RenderPass<'static>;

    fn create_drawable(
        &mut self,
        buffer: BufferHandle,
        vertex_count: u32,
    ) -> Result<DrawableHandle, ResourceError> {
        let Some(data) = self.registry.get(buffer) else {
            return Err(ResourceError::UnknownBuffer(buffer));
        };
        let needed = u64::from(vertex_count) * std::mem::size_of::<TileVertex>() as u64;
        if data.size() < needed {
            return Err(ResourceError::DrawableCreation {
                buffer,
                reason: format!("buffer holds {} bytes, draw needs {needed}", data.size()),
            });
        }

        self.next_id += 1;
        let Some(drawable) = DrawableHandle::new(self.next_id) else {
            return Err(ResourceError::DrawableCreation {
                buffer,
                reason: "drawable id space exhausted".into(),
            });
        };
        self.bindings.insert(
            drawable,
            TileBinding {
                buffer: data,
                vertex_count,
            },
        );
        Ok(drawable)
    }

    fn destroy_drawable(&mut self, drawable: DrawableHandle) {
        if self.bindings.remove(&drawable).is_none() {
            tracing::warn!(%drawable, "destroy of unknown tile binding");
        }
    }

    fn draw(
        &mut self,
        pass: &mut wgpu::RenderPass<'static>,
        slot: TileSlot,
        drawable: DrawableHandle,
        vertex_count: u32,
    ) {
        let Some(binding) = self.bindings.get(&drawable) else {
            tracing::warn!(%slot, %drawable, "draw of unknown tile binding");
            return;
        };
        pass.set_vertex_buffer(0, binding.buffer.slice(..));
        pass.draw(0..binding.vertex_count.min(vertex_count), 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry() {
        let registry = BufferRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(BufferHandle::new(1).unwrap()).is_none());
    }

    #[test]
    fn drawer_rejects_unregistered_buffers() {
        let mut drawer = WgpuTileDrawer::new(BufferRegistry::new());
        let handle = BufferHandle::new(3).unwrap();
        assert_eq!(
            drawer.create_drawable(handle, 6),
            Err(ResourceError::UnknownBuffer(handle))
        );
        assert_eq!(drawer.binding_count(), 0);
    }
}
