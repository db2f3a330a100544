use std::sync::Arc;

use ash::vk;
use truvis_gfx::resources::shader_module::GfxShaderModule;

/// 着色器文件的后缀与 stage 的对应关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    #[inline]
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Vertex => "vert.spv",
            Self::Fragment => "frag.spv",
            Self::Compute => "comp.spv",
        }
    }

    #[inline]
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// 最多包含 vertex / fragment / compute 三个 stage，至少有一个时有效
#[derive(Debug, Clone, Default)]
pub struct ShaderProgram {
    pub vertex: Option<Arc<GfxShaderModule>>,
    pub fragment: Option<Arc<GfxShaderModule>>,
    pub compute: Option<Arc<GfxShaderModule>>,
}

impl ShaderProgram {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.vertex.is_some() || self.fragment.is_some() || self.compute.is_some()
    }

    #[inline]
    pub fn has_compute(&self) -> bool {
        self.compute.is_some()
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&Arc<GfxShaderModule>> {
        match stage {
            ShaderStage::Vertex => self.vertex.as_ref(),
            ShaderStage::Fragment => self.fragment.as_ref(),
            ShaderStage::Compute => self.compute.as_ref(),
        }
    }

    pub(crate) fn set_stage(&mut self, stage: ShaderStage, module: Arc<GfxShaderModule>) {
        let slot = match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
            ShaderStage::Compute => &mut self.compute,
        };
        *slot = Some(module);
    }
}
