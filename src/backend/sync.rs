// Synchronization primitives
//
// Fences and "image available" semaphores gate CPU-side reuse of a frame slot,
// so there is one of each per frame in flight. "Render finished" semaphores
// are waited on by present, which is scoped to a swapchain image, so there is
// one per image.

use super::VulkanDevice;
use crate::error::{Error, Result};
use ash::vk;
use std::sync::Arc;

/// Submit waits on `image_available` and signals `render_finished`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSemaphores {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

/// Image-available follows the frame slot, render-finished follows the image.
///
/// Present keeps the render-finished semaphore busy until its image is
/// acquired again, which the slot index says nothing about.
pub fn select_semaphores(
    image_available: &[vk::Semaphore],
    render_finished: &[vk::Semaphore],
    slot: usize,
    image_index: u32,
) -> FrameSemaphores {
    FrameSemaphores {
        image_available: image_available[slot],
        render_finished: render_finished[image_index as usize],
    }
}

/// Frame synchronization set
pub struct SyncSet {
    image_available: Vec<vk::Semaphore>,
    in_flight: Vec<vk::Fence>,
    render_finished: Vec<vk::Semaphore>,
    device: Arc<VulkanDevice>,
}

impl SyncSet {
    /// Objects are pushed as they are created, so a failure part way through
    /// is cleaned up by `Drop`.
    pub fn new(device: Arc<VulkanDevice>, image_count: usize, frames_in_flight: usize) -> Result<Self> {
        let mut sync = Self {
            image_available: Vec::with_capacity(frames_in_flight),
            in_flight: Vec::with_capacity(frames_in_flight),
            render_finished: Vec::with_capacity(image_count),
            device,
        };

        for _ in 0..frames_in_flight {
            let semaphore = create_semaphore(&sync.device)?;
            sync.image_available.push(semaphore);
            // Start signaled so the first wait on each slot returns immediately
            let fence = create_fence(&sync.device, vk::FenceCreateFlags::SIGNALED)?;
            sync.in_flight.push(fence);
        }
        sync.resize_images(image_count)?;

        Ok(sync)
    }

    /// Recreate the per-image semaphores for a new image count.
    ///
    /// Only valid while the device is idle, i.e. during a swapchain rebuild.
    pub fn resize_images(&mut self, image_count: usize) -> Result<()> {
        if self.render_finished.len() == image_count {
            return Ok(());
        }
        for semaphore in self.render_finished.drain(..) {
            unsafe { self.device.device.destroy_semaphore(semaphore, None) };
        }
        for _ in 0..image_count {
            let semaphore = create_semaphore(&self.device)?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    pub fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.image_available[slot]
    }

    /// Semaphores for submitting `slot`'s work against `image_index`
    pub fn frame_semaphores(&self, slot: usize, image_index: u32) -> FrameSemaphores {
        select_semaphores(&self.image_available, &self.render_finished, slot, image_index)
    }

    pub fn in_flight(&self, slot: usize) -> vk::Fence {
        self.in_flight[slot]
    }

    /// What present waits on; the same semaphore the submit for this image signaled
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize]
    }

    /// Block until the GPU work last submitted with this slot's fence is done
    pub fn wait(&self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight[slot]], true, u64::MAX)
        }
        .map_err(Error::vulkan("vkWaitForFences"))
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight[slot]]) }
            .map_err(Error::vulkan("vkResetFences"))
    }
}

impl Drop for SyncSet {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &semaphore in self.image_available.iter().chain(&self.render_finished) {
                device.destroy_semaphore(semaphore, None);
            }
            for &fence in &self.in_flight {
                device.destroy_fence(fence, None);
            }
        }
    }
}

fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::default();
    unsafe { device.device.create_semaphore(&info, None) }
        .map_err(Error::vulkan("vkCreateSemaphore"))
}

fn create_fence(device: &VulkanDevice, flags: vk::FenceCreateFlags) -> Result<vk::Fence> {
    let info = vk::FenceCreateInfo::default().flags(flags);
    unsafe { device.device.create_fence(&info, None) }.map_err(Error::vulkan("vkCreateFence"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn semaphores(base: u64, count: u64) -> Vec<vk::Semaphore> {
        (0..count).map(|i| vk::Semaphore::from_raw(base + i)).collect()
    }

    #[test]
    fn render_finished_follows_the_image_not_the_slot() {
        let image_available = semaphores(10, 2);
        let render_finished = semaphores(20, 3);

        let picked = select_semaphores(&image_available, &render_finished, 1, 2);
        assert_eq!(picked.image_available, vk::Semaphore::from_raw(11));
        assert_eq!(picked.render_finished, vk::Semaphore::from_raw(22));

        // Same image from the other slot signals the same semaphore
        let other_slot = select_semaphores(&image_available, &render_finished, 0, 2);
        assert_eq!(other_slot.render_finished, picked.render_finished);
        assert_ne!(other_slot.image_available, picked.image_available);
    }

    #[test]
    fn images_beyond_the_slot_count_get_their_own_semaphore() {
        let image_available = semaphores(10, 2);
        let render_finished = semaphores(20, 3);

        let signaled: Vec<_> = (0..3)
            .map(|image| select_semaphores(&image_available, &render_finished, 0, image).render_finished)
            .collect();
        assert_eq!(signaled, render_finished);
    }
}
