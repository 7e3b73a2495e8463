// Per-frame vertex staging
//
// Host-visible vertex buffers, one per frame slot, allocated through
// gpu-allocator. A slot's buffer is only rewritten after that slot's fence
// has signaled, so the GPU never reads a buffer while it is being filled.

use super::device::DeviceContext;
use super::error::{GpuError, InitError, VkContext};
use crate::geometry::Vertex;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Vertices each frame slot can hold
pub const VERTEX_CAPACITY: usize = 4096;

/// Fail if `needed` vertices do not fit into `capacity`
pub fn check_capacity(needed: usize, capacity: usize) -> Result<(), GpuError> {
    if needed > capacity {
        return Err(GpuError::VertexOverflow { needed, capacity });
    }
    Ok(())
}

pub struct VertexBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    capacity: usize,
    device: Arc<DeviceContext>,
}

impl VertexBuffer {
    pub fn new(device: Arc<DeviceContext>, capacity: usize, name: &str) -> Result<Self, InitError> {
        let size = (capacity * std::mem::size_of::<Vertex>()) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device().create_buffer(&buffer_info, None) }.init_context("Buffer creation")?;

        let requirements = unsafe { device.device().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        // From here on Drop releases the buffer and whatever was allocated
        let mut staged = Self {
            buffer,
            allocation: None,
            capacity,
            device,
        };

        let allocation = allocation?;
        let bound = unsafe {
            staged
                .device
                .device()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        staged.allocation = Some(allocation);
        bound.init_context("Buffer memory binding")?;

        Ok(staged)
    }

    /// Copy `vertices` to the start of the buffer, returning the draw count
    pub fn write(&mut self, vertices: &[Vertex]) -> Result<u32, GpuError> {
        check_capacity(vertices.len(), self.capacity)?;

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(GpuError::Vulkan {
                what: "Vertex buffer mapping",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            })?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(vertices.len() as u32)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::warn!("Failed to free vertex buffer memory: {}", e);
            }
        }
    }
}
