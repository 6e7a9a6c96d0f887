// Backend module - Vulkan abstraction layer
//
// Thin owning wrappers around ash handles. Everything here holds an
// Arc<VulkanDevice> and releases its handles in Drop.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use command::CommandSlots;
pub use device::VulkanDevice;
pub use pipeline::GraphicsPipeline;
pub use swapchain::Swapchain;
pub use sync::SyncSet;
