use std::mem::offset_of;

use ash::vk;

/// 网格的标准顶点布局
///
/// 成员按大小降序排列，没有 padding
#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub color: [f32; 4],
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            color: [1.0; 4],
            position: [0.0; 3],
            normal: [0.0, 1.0, 0.0],
            texcoord: [0.0; 2],
        }
    }
}

impl Vertex {
    #[inline]
    pub fn new(position: glam::Vec3, normal: glam::Vec3, texcoord: glam::Vec2, color: glam::Vec4) -> Self {
        Self {
            color: color.to_array(),
            position: position.to_array(),
            normal: normal.to_array(),
            texcoord: texcoord.to_array(),
        }
    }

    pub fn vertex_input_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            // color
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            // position
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            // normal
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            // texcoord
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, texcoord) as u32,
            },
        ]
    }
}
