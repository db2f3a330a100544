use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;

/// 拥有一个 vk::ShaderModule，drop 时销毁
pub struct GfxShaderModule {
    handle: vk::ShaderModule,
    stage: vk::ShaderStageFlags,

    ctx: GfxContext,
    debug_name: String,
}

impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        log::debug!("Dropping GfxShaderModule: {}", self.debug_name);
        self.ctx.destroy_shader_module(self.handle);
    }
}

impl std::fmt::Debug for GfxShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxShaderModule")
            .field("name", &self.debug_name)
            .field("stage", &self.stage)
            .finish()
    }
}

// init & destroy
impl GfxShaderModule {
    /// # 参数
    /// - code: SPIR-V words
    pub fn new(
        ctx: &GfxContext,
        code: &[u32],
        stage: vk::ShaderStageFlags,
        debug_name: impl Into<String>,
    ) -> GfxResult<Self> {
        let debug_name = debug_name.into();
        let handle = ctx
            .create_shader_module(code)
            .map_err(|e| GfxError::from_alloc_result(e, &debug_name))?;
        Ok(Self {
            handle,
            stage,
            ctx: ctx.clone(),
            debug_name,
        })
    }
}

// getters
impl GfxShaderModule {
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
