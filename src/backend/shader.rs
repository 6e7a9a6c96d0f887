// Shader module loading
//
// Vulkan consumes SPIR-V. build.rs compiles the GLSL sources under shaders/
// with glslc; here the resulting .spv files are read at startup.

use super::VulkanDevice;
use crate::error::{Error, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Shader module, destroyed on drop. Kept alive as long as pipelines may need rebuilding.
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Load a SPIR-V file and create a shader module
    pub fn load(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let shader_error = |source| Error::Shader {
            path: path.to_path_buf(),
            source,
        };

        let bytes = std::fs::read(path).map_err(shader_error)?;
        // read_spv checks the magic number and takes care of alignment
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(shader_error)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(Error::vulkan("vkCreateShaderModule"))?;

        log::debug!("Loaded shader {:?} ({} words)", path, code.len());

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
