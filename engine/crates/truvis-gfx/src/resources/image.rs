use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::foundation::device_functions::GfxImageDesc;

/// device local 的 image，drop 时销毁
pub struct GfxImage {
    handle: vk::Image,
    desc: GfxImageDesc,
    aspect: vk::ImageAspectFlags,

    ctx: GfxContext,
    debug_name: String,
}

impl Drop for GfxImage {
    fn drop(&mut self) {
        self.ctx.destroy_image(self.handle);
    }
}

// init & destroy
impl GfxImage {
    pub fn new(ctx: &GfxContext, desc: GfxImageDesc, debug_name: impl AsRef<str>) -> GfxResult<Self> {
        let debug_name = debug_name.as_ref();
        let handle = ctx.create_image(&desc, debug_name).map_err(|e| GfxError::from_alloc_result(e, debug_name))?;
        Ok(Self {
            handle,
            desc,
            aspect: Self::aspect_of(desc.format),
            ctx: ctx.clone(),
            debug_name: debug_name.to_string(),
        })
    }

    /// 可采样、可作为传输目标的 2D 纹理；`mip_levels > 1` 时额外可作为 blit 源
    pub fn new_texture_2d(
        ctx: &GfxContext,
        width: u32,
        height: u32,
        format: vk::Format,
        mip_levels: u32,
        debug_name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        Self::new(
            ctx,
            GfxImageDesc {
                extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                format,
                mip_levels,
                array_layers: 1,
                usage,
            },
            debug_name,
        )
    }

    /// 单个 texel 的字节数，块压缩等不支持逐 texel 计算的格式返回 None
    pub fn texel_size(format: vk::Format) -> Option<vk::DeviceSize> {
        let size = match format {
            vk::Format::R8_UNORM | vk::Format::R8_SRGB | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,
            vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::R16_UINT | vk::Format::D16_UNORM => 2,
            vk::Format::R8G8B8_UNORM | vk::Format::R8G8B8_SRGB | vk::Format::D16_UNORM_S8_UINT => 3,
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R16G16_SFLOAT
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D24_UNORM_S8_UINT => 4,
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 8,
            vk::Format::R32G32B32_SFLOAT => 12,
            vk::Format::R32G32B32A32_SFLOAT => 16,
            _ => return None,
        };
        Some(size)
    }

    fn aspect_of(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.desc.array_layers
    }

    /// 某个 mip level 的尺寸，每个维度至少为 1
    #[inline]
    pub fn mip_extent(&self, mip_level: u32) -> vk::Extent3D {
        let extent = self.desc.extent;
        vk::Extent3D {
            width: (extent.width >> mip_level).max(1),
            height: (extent.height >> mip_level).max(1),
            depth: (extent.depth >> mip_level).max(1),
        }
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// 覆盖所有 mip level 与 layer 的 subresource range
    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.desc.mip_levels,
            base_array_layer: 0,
            layer_count: self.desc.array_layers,
        }
    }
}
