use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;

/// 拥有一个 vk::Fence，drop 时销毁
pub struct GfxFence {
    handle: vk::Fence,
    ctx: GfxContext,
}

impl Drop for GfxFence {
    fn drop(&mut self) {
        self.ctx.destroy_fence(self.handle);
    }
}

// init & destroy
impl GfxFence {
    /// # 参数
    /// - signaled: 是否创建时就 signaled
    pub fn new(ctx: &GfxContext, signaled: bool) -> GfxResult<Self> {
        let handle = ctx.create_fence(signaled).map_err(|e| GfxError::from_alloc_result(e, "fence"))?;
        Ok(Self {
            handle,
            ctx: ctx.clone(),
        })
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

// tools
impl GfxFence {
    /// 非阻塞地查询
    #[inline]
    pub fn is_signaled(&self) -> GfxResult<bool> {
        self.ctx.fence_status(self.handle).map_err(GfxError::from_sync_result)
    }

    /// 阻塞等待，超时返回 `GfxError::Timeout`
    pub fn wait(&self, timeout_ns: u64) -> GfxResult<()> {
        match self.ctx.wait_fence(self.handle, timeout_ns) {
            Ok(true) => Ok(()),
            Ok(false) => Err(GfxError::Timeout),
            Err(e) => Err(GfxError::from_sync_result(e)),
        }
    }

    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        self.ctx.reset_fence(self.handle).map_err(GfxError::from_sync_result)
    }
}
