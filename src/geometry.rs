// Scene geometry
//
// A single static draw: a colored rectangle drawn with an index buffer, or a
// plain triangle drawn without one.

use crate::backend::buffer::GpuBuffer;
use crate::backend::command::DrawCall;
use crate::backend::pipeline::VertexLayout;
use crate::backend::VulkanDevice;
use crate::error::Result;
use ash::vk;
use glam::{Vec2, Vec3};
use serde::Deserialize;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

/// Interleaved position + color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

const fn vertex(x: f32, y: f32, r: f32, g: f32, b: f32) -> Vertex {
    Vertex {
        position: Vec2::new(x, y),
        color: Vec3::new(r, g, b),
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    vertex(-0.5, -0.5, 1.0, 0.0, 0.0),
    vertex(0.5, -0.5, 0.0, 1.0, 0.0),
    vertex(0.5, 0.5, 0.0, 0.0, 1.0),
    vertex(-0.5, 0.5, 1.0, 1.0, 1.0),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    vertex(0.0, -0.5, 1.0, 0.0, 0.0),
    vertex(0.5, 0.5, 0.0, 1.0, 0.0),
    vertex(-0.5, 0.5, 0.0, 0.0, 1.0),
];

impl Vertex {
    pub fn layout() -> VertexLayout {
        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        };

        let position = vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        };

        let color = vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        };

        VertexLayout {
            bindings: vec![binding],
            attributes: vec![position, color],
        }
    }
}

/// Which built-in geometry to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    /// Indexed rectangle
    #[default]
    Quad,
    /// Non-indexed triangle
    Triangle,
}

/// Vertex/index buffers uploaded for the configured geometry
pub struct GeometryBuffers {
    vertices: GpuBuffer,
    indices: Option<GpuBuffer>,
    count: u32,
}

impl GeometryBuffers {
    pub fn upload(device: Arc<VulkanDevice>, kind: GeometryKind) -> Result<Self> {
        let geometry = match kind {
            GeometryKind::Quad => {
                let vertices = GpuBuffer::with_data(
                    device.clone(),
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    &QUAD_VERTICES,
                    "quad vertices",
                )?;
                let indices = GpuBuffer::with_data(
                    device,
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    &QUAD_INDICES,
                    "quad indices",
                )?;
                Self {
                    vertices,
                    indices: Some(indices),
                    count: QUAD_INDICES.len() as u32,
                }
            }
            GeometryKind::Triangle => Self {
                vertices: GpuBuffer::with_data(
                    device,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    &TRIANGLE_VERTICES,
                    "triangle vertices",
                )?,
                indices: None,
                count: TRIANGLE_VERTICES.len() as u32,
            },
        };

        log::info!("Uploaded {:?} geometry ({} elements)", kind, geometry.count);
        Ok(geometry)
    }

    pub fn draw_call(&self, pipeline: vk::Pipeline) -> DrawCall {
        DrawCall {
            pipeline,
            vertex_buffer: Some(self.vertices.buffer),
            index_buffer: self
                .indices
                .as_ref()
                .map(|indices| (indices.buffer, vk::IndexType::UINT16)),
            count: self.count,
        }
    }
}
