// Buffer utilities for vertex and index data
//
// Buffers live in host-visible memory from the GPU allocator. The geometry is
// small and static, so it is written once through the persistent mapping.

use super::VulkanDevice;
use crate::error::{Error, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU buffer with its memory allocation
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer and fill it with data
    pub fn with_data<T: Copy>(
        device: Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(Error::vulkan("vkCreateBuffer"))?;

        // From here on Drop releases whatever has been set up
        let mut gpu_buffer = Self {
            buffer,
            allocation: None,
            device,
        };

        let requirements = unsafe {
            gpu_buffer
                .device
                .device
                .get_buffer_memory_requirements(buffer)
        };

        let allocation = gpu_buffer.device.with_allocator(|allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        })?;
        let allocation = gpu_buffer.allocation.insert(allocation);

        unsafe {
            gpu_buffer
                .device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(Error::vulkan("vkBindBufferMemory"))?;

        // Copy data to buffer
        let mapped = allocation.mapped_ptr().ok_or_else(|| {
            Error::Allocation(gpu_allocator::AllocationError::Internal(format!(
                "{name} is not host-mapped"
            )))
        })?;
        unsafe {
            let dst = mapped.as_ptr() as *mut T;
            dst.copy_from_nonoverlapping(data.as_ptr(), data.len());
        }

        Ok(gpu_buffer)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?));
            if let Err(e) = freed {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
    }
}
