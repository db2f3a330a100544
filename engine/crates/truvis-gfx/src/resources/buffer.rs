use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::foundation::device_functions::MemoryLocation;

pub struct GfxBuffer {
    handle: vk::Buffer,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,

    ctx: GfxContext,
    debug_name: String,
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        self.ctx.destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for GfxBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxBuffer")
            .field("name", &self.debug_name)
            .field("handle", &self.handle)
            .field("size", &self.size)
            .finish()
    }
}

// init & destroy
impl GfxBuffer {
    pub fn new(
        ctx: &GfxContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let debug_name = debug_name.as_ref();
        let handle = ctx
            .create_buffer(size, usage, location, debug_name)
            .map_err(|e| GfxError::from_alloc_result(e, debug_name))?;
        Ok(Self {
            handle,
            size,
            usage,
            location,
            ctx: ctx.clone(),
            debug_name: debug_name.to_string(),
        })
    }

    /// host 可写、可作为 copy 源的 buffer
    #[inline]
    pub fn new_stage_buffer(ctx: &GfxContext, size: vk::DeviceSize, debug_name: impl AsRef<str>) -> GfxResult<Self> {
        Self::new(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, debug_name)
    }

    /// 只能通过传输写入的 device local buffer
    #[inline]
    pub fn new_device_buffer(
        ctx: &GfxContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            debug_name,
        )
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

// tools
impl GfxBuffer {
    /// 通过 mem map 的方式将 data 写入 buffer
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        GfxError::check_range(offset, data.len() as vk::DeviceSize, self.size)?;
        self.ctx.write_buffer(self.handle, offset, data).map_err(GfxError::Vulkan)
    }

    /// 通过 mem map 的方式读取 buffer 中的数据
    pub fn read(&self, offset: vk::DeviceSize, data: &mut [u8]) -> GfxResult<()> {
        GfxError::check_range(offset, data.len() as vk::DeviceSize, self.size)?;
        self.ctx.read_buffer(self.handle, offset, data).map_err(GfxError::Vulkan)
    }
}
