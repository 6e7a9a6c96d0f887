// Error taxonomy for the frame lifecycle
//
// Every fatal status carries the name of the Vulkan call that produced it.
// Out-of-date and suboptimal surfaces are not errors: the swapchain wrapper
// reports them as outcomes and only the frame driver decides what they mean.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A step of building the presentable surface failed.
    #[error("failed to build presentable surface: {op} returned {result}")]
    SurfaceBuildFailed { op: &'static str, result: vk::Result },

    /// Command buffer recording failed; the buffer must not be submitted.
    #[error("failed to record command buffer: {op} returned {result}")]
    RecordFailed { op: &'static str, result: vk::Result },

    /// Any other non-success status from a Vulkan call.
    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("failed to load shader {path:?}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `map_err` adapter for surface construction steps.
    pub fn surface(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::SurfaceBuildFailed { op, result }
    }

    /// `map_err` adapter for command recording steps.
    pub fn record(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::RecordFailed { op, result }
    }

    /// `map_err` adapter for everything else.
    pub fn vulkan(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { op, result }
    }
}
