// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Negotiation (extent, format, present mode, image count) is a pure function
// of the surface support query so it can be checked without a GPU.

use super::VulkanDevice;
use crate::error::{Error, Result};
use ash::vk;
use std::sync::Arc;

/// Format/color space pair we try to get before settling for the first one offered
pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Everything the surface reports about itself for one physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(device: &VulkanDevice) -> Result<Self> {
        let loader = &device.surface_loader;
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(device.physical_device, device.surface)
                    .map_err(Error::surface("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                formats: loader
                    .get_physical_device_surface_formats(device.physical_device, device.surface)
                    .map_err(Error::surface("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(device.physical_device, device.surface)
                    .map_err(Error::surface("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            })
        }
    }
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
}

impl SurfaceConfig {
    /// Derive the configuration from the surface support and current window size.
    ///
    /// Returns `None` when the surface offers no formats at all.
    pub fn negotiate(
        support: &SurfaceSupport,
        window_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Option<Self> {
        let format = choose_format(&support.formats)?;
        Some(Self {
            extent: choose_extent(&support.capabilities, window_size),
            format: format.format,
            color_space: format.color_space,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

/// Use the surface's extent, or the window's pixel size clamped into range
/// when the surface leaves it up to us (`u32::MAX` sentinel).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, (width, height): (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// First exact match of the preferred pair, otherwise the first supported format.
pub fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode if supported; FIFO is always available.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// No image was acquired; the swapchain has to be rebuilt.
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// One built swapchain: handle, borrowed images, owned views, configuration.
///
/// The images belong to the swapchain and are never destroyed here.
struct SurfaceState {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    config: Option<SurfaceConfig>,
}

impl SurfaceState {
    fn empty() -> Self {
        Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            config: None,
        }
    }
}

/// Presentable surface manager
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    state: SurfaceState,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        window_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);
        let state = build(&device, &loader, window_size, preferred_present_mode)?;
        Ok(Self {
            loader,
            state,
            preferred_present_mode,
            device,
        })
    }

    /// Tear down and build again against the same surface.
    ///
    /// Safe to call repeatedly. If the build fails the manager is left empty
    /// and can be rebuilt or dropped.
    pub fn rebuild(&mut self, window_size: (u32, u32)) -> Result<()> {
        self.device.wait_idle()?;

        let old = std::mem::replace(&mut self.state, SurfaceState::empty());
        destroy(&self.device, &self.loader, old);

        self.state = build(
            &self.device,
            &self.loader,
            window_size,
            self.preferred_present_mode,
        )?;
        Ok(())
    }

    /// Configuration of the current chain, `None` after a failed rebuild.
    pub fn config(&self) -> Option<SurfaceConfig> {
        self.state.config
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.state.config.map(|c| c.extent).unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.state.images.len()
    }

    pub fn image(&self, index: u32) -> vk::Image {
        self.state.images[index as usize]
    }

    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.state.image_views[index as usize]
    }

    /// Acquire next image for rendering, signaling `semaphore` once it is usable
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.state.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(Error::vulkan("vkAcquireNextImageKHR")(e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let swapchains = [self.state.handle];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(Error::vulkan("vkQueuePresentKHR")(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut self.state, SurfaceState::empty());
        destroy(&self.device, &self.loader, state);
    }
}

fn build(
    device: &VulkanDevice,
    loader: &ash::khr::swapchain::Device,
    window_size: (u32, u32),
    preferred_present_mode: vk::PresentModeKHR,
) -> Result<SurfaceState> {
    let support = SurfaceSupport::query(device)?;
    let config = SurfaceConfig::negotiate(&support, window_size, preferred_present_mode).ok_or(
        Error::SurfaceBuildFailed {
            op: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        },
    )?;

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(device.surface)
        .min_image_count(config.image_count)
        .image_format(config.format)
        .image_color_space(config.color_space)
        .image_extent(config.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(config.present_mode)
        .clipped(true);

    let mut state = SurfaceState::empty();
    state.handle = unsafe { loader.create_swapchain(&create_info, None) }
        .map_err(Error::surface("vkCreateSwapchainKHR"))?;

    // From here on `state` owns what has been created; tear it down on any failure
    if let Err(e) = create_views(device, loader, &mut state, config.format) {
        destroy(device, loader, state);
        return Err(e);
    }
    state.config = Some(config);

    log::info!(
        "Swapchain built: {}x{} {:?}/{:?} {:?}, {} images",
        config.extent.width,
        config.extent.height,
        config.format,
        config.color_space,
        config.present_mode,
        state.images.len()
    );

    Ok(state)
}

fn create_views(
    device: &VulkanDevice,
    loader: &ash::khr::swapchain::Device,
    state: &mut SurfaceState,
    format: vk::Format,
) -> Result<()> {
    state.images = unsafe { loader.get_swapchain_images(state.handle) }
        .map_err(Error::surface("vkGetSwapchainImagesKHR"))?;

    for &image in &state.images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&create_info, None) }
            .map_err(Error::surface("vkCreateImageView"))?;
        state.image_views.push(view);
    }

    Ok(())
}

fn destroy(device: &VulkanDevice, loader: &ash::khr::swapchain::Device, state: SurfaceState) {
    unsafe {
        for view in state.image_views {
            device.device.destroy_image_view(view, None);
        }
        if state.handle != vk::SwapchainKHR::null() {
            loader.destroy_swapchain(state.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn support(caps: vk::SurfaceCapabilitiesKHR) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: caps,
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    fn undefined_extent_caps(min: vk::Extent2D, max: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: min,
            max_image_extent: max,
            ..Default::default()
        }
    }

    #[test]
    fn extent_is_clamped_into_capability_bounds() {
        let caps = undefined_extent_caps(extent(64, 64), extent(1920, 1080));
        for &(w, h) in &[(1, 1), (64, 64), (800, 600), (1920, 1080), (4000, 3000), (100, 5000)] {
            let config = SurfaceConfig::negotiate(&support(caps), (w, h), vk::PresentModeKHR::MAILBOX)
                .unwrap();
            assert!((64..=1920).contains(&config.extent.width), "{w}x{h}");
            assert!((64..=1080).contains(&config.extent.height), "{w}x{h}");
        }
    }

    #[test]
    fn defined_extent_is_taken_as_is() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1024, 768),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, (10, 10)), extent(1024, 768));
    }

    #[test]
    fn fixed_1280x720_bounds_win_in_both_branches() {
        let fixed = extent(1280, 720);
        let undefined = undefined_extent_caps(fixed, fixed);
        let defined = vk::SurfaceCapabilitiesKHR {
            current_extent: fixed,
            ..undefined
        };
        assert_eq!(choose_extent(&undefined, (1280, 720)), fixed);
        assert_eq!(choose_extent(&undefined, (640, 480)), fixed);
        assert_eq!(choose_extent(&defined, (1280, 720)), fixed);
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        // 0 means no upper bound
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        for (min, max) in [(1, 1), (1, 3), (2, 0), (3, 3), (4, 16)] {
            caps.min_image_count = min;
            caps.max_image_count = max;
            let count = choose_image_count(&caps);
            assert!(count >= min);
            assert!(count <= max.max(count));
            if max > 0 {
                assert!(count <= max);
            }
        }
    }

    #[test]
    fn preferred_format_is_first_match() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(PREFERRED_FORMAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE),
        ];
        let chosen = choose_format(&formats).unwrap();
        assert_eq!(chosen.format, PREFERRED_FORMAT);
        assert_eq!(chosen.color_space, PREFERRED_COLOR_SPACE);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_format(&[]).is_none());
    }

    #[test]
    fn fifo_only_surface_gets_fifo() {
        let mode = choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX);
        assert_eq!(mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn mailbox_is_taken_when_offered() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn negotiation_is_stable_under_stable_inputs() {
        let caps = undefined_extent_caps(extent(1, 1), extent(4096, 4096));
        let support = support(caps);
        let first = SurfaceConfig::negotiate(&support, (1280, 720), vk::PresentModeKHR::MAILBOX);
        let second = SurfaceConfig::negotiate(&support, (1280, 720), vk::PresentModeKHR::MAILBOX);
        assert_eq!(first, second);

        let config = first.unwrap();
        assert_eq!(config.extent, extent(1280, 720));
        assert_eq!(config.format, PREFERRED_FORMAT);
        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.image_count, 3);
    }

    #[test]
    fn no_formats_means_no_configuration() {
        let support = SurfaceSupport {
            formats: vec![],
            ..support(undefined_extent_caps(extent(1, 1), extent(8, 8)))
        };
        assert!(SurfaceConfig::negotiate(&support, (4, 4), vk::PresentModeKHR::FIFO).is_none());
    }
}
