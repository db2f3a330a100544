use ash::vk;

/// 某个 image layout 隐含的访问类型与 pipeline stage
///
/// 只依赖 layout 本身，layout transition 两端各查一次就能得到正确的同步范围
#[inline]
pub fn layout_access_stage(layout: vk::ImageLayout) -> (vk::AccessFlags2, vk::PipelineStageFlags2) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags2::NONE, vk::PipelineStageFlags2::TOP_OF_PIPE),
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags2::SHADER_READ, vk::PipelineStageFlags2::FRAGMENT_SHADER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags2::TRANSFER_READ, vk::PipelineStageFlags2::TRANSFER),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags2::TRANSFER_WRITE, vk::PipelineStageFlags2::TRANSFER),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags2::NONE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
        _ => (vk::AccessFlags2::NONE, vk::PipelineStageFlags2::TOP_OF_PIPE),
    }
}

/// stage 是否超出了纯 transfer 队列能执行的范围
#[inline]
pub fn requires_graphics_queue(stage: vk::PipelineStageFlags2) -> bool {
    let transfer_compatible = vk::PipelineStageFlags2::TOP_OF_PIPE
        | vk::PipelineStageFlags2::BOTTOM_OF_PIPE
        | vk::PipelineStageFlags2::TRANSFER
        | vk::PipelineStageFlags2::NONE;
    stage.as_raw() & !transfer_compatible.as_raw() != 0
}

/// 便捷创建 image memory barrier 的结构体
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }

    /// builder
    ///
    /// 同时根据两端的 layout 查表填充 stage 与 access mask
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        let (src_access, src_stage) = layout_access_stage(old_layout);
        let (dst_access, dst_stage) = layout_access_stage(new_layout);
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self.src_mask(src_stage, src_access).dst_mask(dst_stage, dst_access)
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.inner.subresource_range = range;
        self
    }

    /// builder
    ///
    /// 只作用于单个 mip level
    #[inline]
    pub fn mip_level(mut self, level: u32) -> Self {
        self.inner.subresource_range.base_mip_level = level;
        self.inner.subresource_range.level_count = 1;
        self
    }

    /// 是否必须在 graphics 队列上执行
    #[inline]
    pub fn requires_graphics_queue(&self) -> bool {
        requires_graphics_queue(self.inner.src_stage_mask) || requires_graphics_queue(self.inner.dst_stage_mask)
    }
}
