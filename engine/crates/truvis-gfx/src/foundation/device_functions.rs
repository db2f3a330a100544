use ash::prelude::VkResult;
use ash::vk;

use crate::descriptors::write::GfxWriteDescriptorSet;

/// 提交工作时使用的队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxQueueType {
    Graphics,
    /// 专用的传输队列；设备没有时会退化到 graphics 队列
    Transfer,
}

/// buffer 的内存位置，与 vk-mem 的 MemoryUsage 对应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// 只有 GPU 可以访问
    GpuOnly,
    /// CPU 顺序写入，GPU 读取：staging buffer 与 uniform buffer
    CpuToGpu,
    /// GPU 写入，CPU 回读
    GpuToCpu,
}

/// 创建 image 所需的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxImageDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
}

/// 设备接口
///
/// 上层组件只通过这个 trait 访问 GPU，从而不依赖任何全局单例。
/// `VulkanDevice` 基于 ash + vk-mem 实现；`HeadlessDevice` 在 CPU 上模拟，用于测试。
///
/// 所有 `cmd_*` 函数只负责录制，命令在 `queue_submit` 之后才会执行。
pub trait DeviceFunctions: Send + Sync {
    // queue & format
    fn queue_family_index(&self, queue: GfxQueueType) -> u32;

    /// 是否存在独立于 graphics 的 transfer 队列
    fn has_dedicated_transfer_queue(&self) -> bool;

    /// optimal tiling 下 format 支持的特性
    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags;

    // buffer
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        debug_name: &str,
    ) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// 通过 mem map 写入 host visible 的 buffer
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()>;

    /// 通过 mem map 读取 host visible 的 buffer
    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &mut [u8]) -> VkResult<()>;

    // image
    fn create_image(&self, desc: &GfxImageDesc, debug_name: &str) -> VkResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);

    // command pool & command buffer
    fn create_command_pool(
        &self,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);

    /// 以 ONE_TIME_SUBMIT 的方式开始录制
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // commands
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    /// synchronization2 风格的 image barrier
    fn cmd_image_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2<'_>]);
    #[allow(clippy::too_many_arguments)]
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    // fence & submit
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// 非阻塞地查询 fence 是否已经 signaled
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;

    /// 阻塞等待 fence；超时返回 `Ok(false)`
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool>;

    /// 提交单个 command buffer，完成后 signal `fence`
    fn queue_submit(&self, queue: GfxQueueType, command_buffer: vk::CommandBuffer, fence: vk::Fence)
    -> VkResult<()>;

    fn wait_idle(&self) -> VkResult<()>;

    // descriptor
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VkResult<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;

    /// 一次性提交所有的 descriptor 写入
    fn update_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]);

    // shader
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
}
