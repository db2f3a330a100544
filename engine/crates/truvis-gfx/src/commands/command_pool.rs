use ash::vk;

use crate::commands::command_buffer::GfxCommandBuffer;
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::foundation::device_functions::GfxQueueType;

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
///
/// 同一个 pool 不能被多个线程同时使用，因此每个线程各自持有
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue: GfxQueueType,
    ctx: GfxContext,

    debug_name: String,
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        log::debug!("Dropping GfxCommandPool: {}", self.debug_name);
        // pool 销毁时会一并释放其中所有的 command buffer
        self.ctx.destroy_command_pool(self.handle);
    }
}

// init & destroy
impl GfxCommandPool {
    pub fn new(
        ctx: &GfxContext,
        queue: GfxQueueType,
        flags: vk::CommandPoolCreateFlags,
        debug_name: impl Into<String>,
    ) -> GfxResult<Self> {
        let family = ctx.queue_family_index(queue);
        let handle = ctx.create_command_pool(family, flags).map_err(|e| GfxError::from_alloc_result(e, "command pool"))?;
        Ok(Self {
            handle,
            queue,
            ctx: ctx.clone(),
            debug_name: debug_name.into(),
        })
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    /// pool 所属的队列，从这个 pool 分配的 command buffer 只能提交到这个队列
    #[inline]
    pub fn queue(&self) -> GfxQueueType {
        self.queue
    }
}

// tools
impl GfxCommandPool {
    pub fn allocate(&self, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        GfxCommandBuffer::new(&self.ctx, self, debug_name)
    }

    /// 释放 command buffer
    ///
    /// 释放之后，command buffer 不能再被使用
    pub fn free_command_buffer(&self, command_buffer: GfxCommandBuffer) {
        self.ctx.free_command_buffer(self.handle, command_buffer.vk_handle());
    }
}
