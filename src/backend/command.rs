// Command recording
//
// One primary command buffer per frame slot, re-recorded every frame against
// the acquired swapchain image. The frame's command sequence is written
// against `CommandEncoder` so the ordering can be checked without a GPU.

use super::VulkanDevice;
use crate::error::{Error, Result};
use ash::vk;
use std::sync::Arc;

/// Command pool plus one command buffer per frame in flight
pub struct CommandSlots {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl CommandSlots {
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_family)
            // RESET: buffers are reset one at a time, per slot
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(Error::vulkan("vkCreateCommandPool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(Error::vulkan("vkAllocateCommandBuffers")(e));
            }
        };

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }

    pub fn buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(self.buffers[slot], vk::CommandBufferResetFlags::empty())
        }
        .map_err(Error::vulkan("vkResetCommandBuffer"))
    }

    /// Encoder writing into the given slot's buffer
    pub fn encoder(&self, slot: usize) -> VkCommandEncoder<'_> {
        VkCommandEncoder {
            device: &self.device.device,
            cmd: self.buffers[slot],
        }
    }
}

impl Drop for CommandSlots {
    fn drop(&mut self) {
        // Also frees the command buffers
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// An image layout change with the stages and accesses it is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl LayoutTransition {
    /// Contents are discarded; the image becomes a render target
    pub const TO_COLOR_ATTACHMENT: Self = Self {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags2::NONE,
        dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    };

    /// Rendering is done; hand the image to the presentation engine
    pub const TO_PRESENT: Self = Self {
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags2::NONE,
    };
}

/// The swapchain image a frame paints
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// What to draw: pipeline, optional buffers and the element count
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: Option<vk::Buffer>,
    pub index_buffer: Option<(vk::Buffer, vk::IndexType)>,
    /// Index count when indexed, vertex count otherwise
    pub count: u32,
}

/// The commands one frame is made of
pub trait CommandEncoder {
    fn begin(&mut self) -> Result<()>;
    fn transition(&mut self, image: vk::Image, transition: LayoutTransition);
    fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D, clear_color: [f32; 4]);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType);
    fn set_viewport(&mut self, extent: vk::Extent2D);
    fn set_scissor(&mut self, extent: vk::Extent2D);
    fn draw(&mut self, vertex_count: u32);
    fn draw_indexed(&mut self, index_count: u32);
    fn end_rendering(&mut self);
    fn end(&mut self) -> Result<()>;
}

/// Record one frame: clear the target and issue the draw.
///
/// The order is load-bearing: the layout transitions bracket the rendering
/// scope, and viewport/scissor are dynamic so they follow the pipeline bind.
pub fn record_frame<E: CommandEncoder>(
    encoder: &mut E,
    target: &RenderTarget,
    draw: &DrawCall,
    clear_color: [f32; 4],
) -> Result<()> {
    encoder.begin()?;
    encoder.transition(target.image, LayoutTransition::TO_COLOR_ATTACHMENT);
    encoder.begin_rendering(target.view, target.extent, clear_color);

    encoder.bind_pipeline(draw.pipeline);
    if let Some(buffer) = draw.vertex_buffer {
        encoder.bind_vertex_buffer(buffer);
    }
    if let Some((buffer, index_type)) = draw.index_buffer {
        encoder.bind_index_buffer(buffer, index_type);
    }
    encoder.set_viewport(target.extent);
    encoder.set_scissor(target.extent);

    if draw.index_buffer.is_some() {
        encoder.draw_indexed(draw.count);
    } else {
        encoder.draw(draw.count);
    }

    encoder.end_rendering();
    encoder.transition(target.image, LayoutTransition::TO_PRESENT);
    encoder.end()
}

/// Encoder issuing the commands into a Vulkan command buffer
pub struct VkCommandEncoder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl CommandEncoder for VkCommandEncoder<'_> {
    fn begin(&mut self) -> Result<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.cmd, &begin_info) }
            .map_err(Error::record("vkBeginCommandBuffer"))
    }

    fn transition(&mut self, image: vk::Image, t: LayoutTransition) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(t.src_stage)
            .src_access_mask(t.src_access)
            .dst_stage_mask(t.dst_stage)
            .dst_access_mask(t.dst_access)
            .old_layout(t.old_layout)
            .new_layout(t.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let barriers = [barrier];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency_info) };
    }

    fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D, clear_color: [f32; 4]) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });
        let color_attachments = [color_attachment];

        let rendering_info = vk::RenderingInfo::default()
            .render_area(full_rect(extent))
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering_info) };
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0]) };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(self.cmd, buffer, 0, index_type) };
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, extent: vk::Extent2D) {
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[full_rect(extent)]) };
    }

    fn draw(&mut self, vertex_count: u32) {
        unsafe { self.device.cmd_draw(self.cmd, vertex_count, 1, 0, 0) };
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(self.cmd, index_count, 1, 0, 0, 0) };
    }

    fn end_rendering(&mut self) {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
    }

    fn end(&mut self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }
            .map_err(Error::record("vkEndCommandBuffer"))
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Cmd {
        Begin,
        Transition(vk::Image, LayoutTransition),
        BeginRendering(vk::ImageView, vk::Extent2D, [f32; 4]),
        BindPipeline(vk::Pipeline),
        BindVertexBuffer(vk::Buffer),
        BindIndexBuffer(vk::Buffer, vk::IndexType),
        SetViewport(vk::Extent2D),
        SetScissor(vk::Extent2D),
        Draw(u32),
        DrawIndexed(u32),
        EndRendering,
        End,
    }

    #[derive(Default)]
    struct CapturingEncoder {
        commands: Vec<Cmd>,
        fail_end: bool,
    }

    impl CommandEncoder for CapturingEncoder {
        fn begin(&mut self) -> Result<()> {
            self.commands.push(Cmd::Begin);
            Ok(())
        }
        fn transition(&mut self, image: vk::Image, transition: LayoutTransition) {
            self.commands.push(Cmd::Transition(image, transition));
        }
        fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D, clear: [f32; 4]) {
            self.commands.push(Cmd::BeginRendering(view, extent, clear));
        }
        fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.commands.push(Cmd::BindPipeline(pipeline));
        }
        fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
            self.commands.push(Cmd::BindVertexBuffer(buffer));
        }
        fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
            self.commands.push(Cmd::BindIndexBuffer(buffer, index_type));
        }
        fn set_viewport(&mut self, extent: vk::Extent2D) {
            self.commands.push(Cmd::SetViewport(extent));
        }
        fn set_scissor(&mut self, extent: vk::Extent2D) {
            self.commands.push(Cmd::SetScissor(extent));
        }
        fn draw(&mut self, vertex_count: u32) {
            self.commands.push(Cmd::Draw(vertex_count));
        }
        fn draw_indexed(&mut self, index_count: u32) {
            self.commands.push(Cmd::DrawIndexed(index_count));
        }
        fn end_rendering(&mut self) {
            self.commands.push(Cmd::EndRendering);
        }
        fn end(&mut self) -> Result<()> {
            if self.fail_end {
                return Err(Error::record("vkEndCommandBuffer")(
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            self.commands.push(Cmd::End);
            Ok(())
        }
    }

    const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    fn target() -> RenderTarget {
        RenderTarget {
            image: vk::Image::from_raw(0x10),
            view: vk::ImageView::from_raw(0x20),
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
        }
    }

    #[test]
    fn indexed_frame_is_recorded_in_order() {
        let target = target();
        let draw = DrawCall {
            pipeline: vk::Pipeline::from_raw(0x30),
            vertex_buffer: Some(vk::Buffer::from_raw(0x40)),
            index_buffer: Some((vk::Buffer::from_raw(0x50), vk::IndexType::UINT16)),
            count: 6,
        };

        let mut encoder = CapturingEncoder::default();
        record_frame(&mut encoder, &target, &draw, BLACK).unwrap();

        assert_eq!(
            encoder.commands,
            vec![
                Cmd::Begin,
                Cmd::Transition(target.image, LayoutTransition::TO_COLOR_ATTACHMENT),
                Cmd::BeginRendering(target.view, target.extent, BLACK),
                Cmd::BindPipeline(draw.pipeline),
                Cmd::BindVertexBuffer(vk::Buffer::from_raw(0x40)),
                Cmd::BindIndexBuffer(vk::Buffer::from_raw(0x50), vk::IndexType::UINT16),
                Cmd::SetViewport(target.extent),
                Cmd::SetScissor(target.extent),
                Cmd::DrawIndexed(6),
                Cmd::EndRendering,
                Cmd::Transition(target.image, LayoutTransition::TO_PRESENT),
                Cmd::End,
            ]
        );
    }

    #[test]
    fn bufferless_frame_draws_non_indexed() {
        let target = target();
        let draw = DrawCall {
            pipeline: vk::Pipeline::from_raw(0x30),
            vertex_buffer: None,
            index_buffer: None,
            count: 3,
        };

        let mut encoder = CapturingEncoder::default();
        record_frame(&mut encoder, &target, &draw, [0.2, 0.3, 0.4, 1.0]).unwrap();

        assert!(!encoder
            .commands
            .iter()
            .any(|c| matches!(c, Cmd::BindVertexBuffer(_) | Cmd::BindIndexBuffer(..))));
        assert!(encoder.commands.contains(&Cmd::Draw(3)));
        assert!(encoder
            .commands
            .contains(&Cmd::BeginRendering(target.view, target.extent, [0.2, 0.3, 0.4, 1.0])));
    }

    #[test]
    fn transitions_bracket_the_rendering_scope() {
        let t = LayoutTransition::TO_COLOR_ATTACHMENT;
        assert_eq!(t.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.dst_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);

        let t = LayoutTransition::TO_PRESENT;
        assert_eq!(t.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
        assert_eq!(t.dst_access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn failed_end_is_a_record_error() {
        let draw = DrawCall {
            pipeline: vk::Pipeline::null(),
            vertex_buffer: None,
            index_buffer: None,
            count: 3,
        };
        let mut encoder = CapturingEncoder {
            fail_end: true,
            ..Default::default()
        };
        let err = record_frame(&mut encoder, &target(), &draw, BLACK).unwrap_err();
        assert!(matches!(err, Error::RecordFailed { op: "vkEndCommandBuffer", .. }));
    }
}
