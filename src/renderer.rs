// Vulkan side of the frame loop
//
// Ties the device, swapchain, sync objects, command buffers, pipeline and
// geometry together and exposes them to the frame driver as a FrameBackend.
//
// Field order matters for Drop: everything holding an Arc<VulkanDevice> is
// declared before `device`, and Drop waits for idle first.

use crate::backend::command::{record_frame, RenderTarget};
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::{CommandSlots, GraphicsPipeline, Swapchain, SyncSet, VulkanDevice};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::{FrameBackend, MAX_FRAMES_IN_FLIGHT};
use crate::geometry::{GeometryBuffers, Vertex};
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

pub struct Renderer {
    geometry: GeometryBuffers,
    pipeline: GraphicsPipeline,
    // Kept for rebuilding the pipeline if the surface format changes
    vert_shader: ShaderModule,
    frag_shader: ShaderModule,
    commands: CommandSlots,
    sync: SyncSet,
    swapchain: Swapchain,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
    window: Arc<Window>,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let device = VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            window.as_ref(),
        )?;

        let swapchain = Swapchain::new(
            device.clone(),
            window_size(&window),
            config.graphics.present_mode(),
        )?;
        let color_format = swapchain
            .config()
            .map(|c| c.format)
            .unwrap_or(vk::Format::UNDEFINED);

        let sync = SyncSet::new(device.clone(), swapchain.image_count(), MAX_FRAMES_IN_FLIGHT)?;
        let commands = CommandSlots::new(device.clone(), MAX_FRAMES_IN_FLIGHT)?;

        let vert_shader = ShaderModule::load(device.clone(), &config.graphics.vertex_shader)?;
        let frag_shader = ShaderModule::load(device.clone(), &config.graphics.fragment_shader)?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            color_format,
            &vert_shader,
            &frag_shader,
            &Vertex::layout(),
        )?;

        let geometry = GeometryBuffers::upload(device.clone(), config.graphics.geometry)?;

        Ok(Self {
            geometry,
            pipeline,
            vert_shader,
            frag_shader,
            commands,
            sync,
            swapchain,
            clear_color: config.graphics.clear_color,
            device,
            window,
        })
    }
}

impl FrameBackend for Renderer {
    fn is_drawable(&self) -> bool {
        let (width, height) = window_size(&self.window);
        width > 0 && height > 0
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.sync.wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.sync.image_available(slot))
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.sync.reset(slot)
    }

    fn reset_command_buffer(&mut self, slot: usize) -> Result<()> {
        self.commands.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let target = RenderTarget {
            image: self.swapchain.image(image_index),
            view: self.swapchain.image_view(image_index),
            extent: self.swapchain.extent(),
        };
        let draw = self.geometry.draw_call(self.pipeline.pipeline);

        record_frame(
            &mut self.commands.encoder(slot),
            &target,
            &draw,
            self.clear_color,
        )
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let semaphores = self.sync.frame_semaphores(slot, image_index);
        let wait_semaphores = [semaphores.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.buffer(slot)];
        let signal_semaphores = [semaphores.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                self.sync.in_flight(slot),
            )
        }
        .map_err(Error::vulkan("vkQueueSubmit"))
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        self.swapchain.present(
            self.device.present_queue,
            image_index,
            self.sync.render_finished(image_index),
        )
    }

    fn rebuild_surface(&mut self) -> Result<()> {
        self.swapchain.rebuild(window_size(&self.window))?;
        self.sync.resize_images(self.swapchain.image_count())?;

        let Some(config) = self.swapchain.config() else {
            return Ok(());
        };

        if config.format != self.pipeline.color_format {
            log::info!(
                "Surface format changed {:?} -> {:?}, rebuilding pipeline",
                self.pipeline.color_format,
                config.format
            );
            self.pipeline = GraphicsPipeline::new(
                self.device.clone(),
                config.format,
                &self.vert_shader,
                &self.frag_shader,
                &Vertex::layout(),
            )?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before teardown: {}", e);
        }
    }
}

fn window_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
