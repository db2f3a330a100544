use ash::vk;

/// GFX 层统一的错误类型
///
/// 需要 `Clone`：同一个失败可能被多个持有 token 或 future 的调用方观察到
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GfxError {
    /// 传输的 offset / size 超出了目标范围
    #[error("range out of bounds: offset {offset} + size {size} exceeds capacity {capacity}")]
    OutOfRange {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    /// format 缺少所需的 GPU 能力，例如 mipmap 所需的线性过滤 blit
    #[error("format {format:?} does not support {required:?}")]
    UnsupportedFormat {
        format: vk::Format,
        required: vk::FormatFeatureFlags,
    },

    /// 同名同 set 的 schema 以不兼容的 binding 重复注册
    #[error("descriptor schema conflict: {name}#{set_index} re-registered with different bindings")]
    SchemaConflict { name: String, set_index: u32 },

    /// writer 引用了 schema 中不存在的 binding 名
    #[error("unknown binding '{binding}' in schema {schema}#{set_index}")]
    UnknownBinding {
        schema: String,
        set_index: u32,
        binding: String,
    },

    /// 设备内存或者描述符池耗尽
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// 等待 fence 超时
    #[error("timed out waiting for gpu work")]
    Timeout,

    /// fence / queue 层面的失败
    #[error("device lost: {0:?}")]
    DeviceLost(vk::Result),

    /// 其余无法归类的 vulkan 错误
    #[error("vulkan call failed: {0:?}")]
    Vulkan(vk::Result),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 将分配类调用的 vk::Result 归类
    pub fn from_alloc_result(result: vk::Result, what: &str) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_FRAGMENTATION => Self::AllocationFailure(format!("{what}: {result:?}")),
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(result),
            other => Self::Vulkan(other),
        }
    }

    /// 将 fence / submit 类调用的 vk::Result 归类
    pub fn from_sync_result(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::AllocationFailure(format!("{result:?}"))
            }
            other => Self::DeviceLost(other),
        }
    }

    /// 检查 `[offset, offset + size)` 是否落在 `capacity` 之内
    ///
    /// offset 等于 capacity 时也视为越界：目标没有剩余空间
    pub fn check_range(offset: vk::DeviceSize, size: vk::DeviceSize, capacity: vk::DeviceSize) -> GfxResult<()> {
        if offset >= capacity || size > capacity - offset {
            return Err(Self::OutOfRange {
                offset,
                size,
                capacity,
            });
        }
        Ok(())
    }
}
