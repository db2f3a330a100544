use ash::vk;
use itertools::Itertools;

use crate::commands::barrier::GfxImageBarrier;
use crate::commands::command_pool::GfxCommandPool;
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::foundation::device_functions::GfxQueueType;
use crate::resources::buffer::GfxBuffer;
use crate::resources::image::GfxImage;

/// 一次性提交的 command buffer
///
/// 不实现 Drop：生命周期由所属的 pool 管理，通过 `GfxCommandPool::free_command_buffer` 归还
pub struct GfxCommandBuffer {
    handle: vk::CommandBuffer,
    queue: GfxQueueType,
    ctx: GfxContext,

    debug_name: String,
}

// init
impl GfxCommandBuffer {
    pub fn new(ctx: &GfxContext, command_pool: &GfxCommandPool, debug_name: &str) -> GfxResult<Self> {
        let handle = ctx
            .allocate_command_buffer(command_pool.handle())
            .map_err(|e| GfxError::from_alloc_result(e, "command buffer"))?;
        Ok(Self {
            handle,
            queue: command_pool.queue(),
            ctx: ctx.clone(),
            debug_name: debug_name.to_string(),
        })
    }
}

// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueType {
        self.queue
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

// 录制
impl GfxCommandBuffer {
    #[inline]
    pub fn begin(&self) -> GfxResult<()> {
        self.ctx.begin_command_buffer(self.handle).map_err(GfxError::Vulkan)
    }

    #[inline]
    pub fn end(&self) -> GfxResult<()> {
        self.ctx.end_command_buffer(self.handle).map_err(GfxError::Vulkan)
    }

    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: &GfxBuffer, regions: &[vk::BufferCopy]) {
        self.ctx.cmd_copy_buffer(self.handle, src, dst.vk_buffer(), regions);
    }

    #[inline]
    pub fn cmd_copy_buffer_to_image(&self, src: vk::Buffer, dst: &GfxImage, regions: &[vk::BufferImageCopy]) {
        self.ctx.cmd_copy_buffer_to_image(
            self.handle,
            src,
            dst.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            regions,
        );
    }

    pub fn image_memory_barrier(&self, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        self.ctx.cmd_image_barriers(self.handle, &barriers);
    }

    /// image 内部不同 mip level 之间的 blit
    pub fn cmd_blit_mip(&self, image: &GfxImage, region: vk::ImageBlit) {
        self.ctx.cmd_blit_image(
            self.handle,
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
            vk::Filter::LINEAR,
        );
    }
}
