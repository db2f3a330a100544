use ash::vk;
use serde::{Deserialize, Serialize};

/// 传输引擎的配置
///
/// 所有字段都有默认值，json 中缺省的字段使用默认值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferManagerConfig {
    /// 关闭后每次传输都会新建 staging buffer，并在回收时立即销毁
    pub enable_staging_buffer_pool: bool,
    /// 每个线程最多缓存的 staging buffer 数量，超出部分在使用后立即销毁
    pub max_pooled_staging_buffers: usize,
    /// 新建 staging buffer 的最小尺寸，小块上传会共用这个尺寸以便复用
    pub min_staging_buffer_size: vk::DeviceSize,
    /// 向上取整时的上限；单次上传超过该值时按实际大小分配
    pub max_staging_buffer_size: vk::DeviceSize,
}

impl Default for TransferManagerConfig {
    fn default() -> Self {
        Self {
            enable_staging_buffer_pool: true,
            max_pooled_staging_buffers: 8,
            min_staging_buffer_size: 1024 * 1024,
            max_staging_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl TransferManagerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 为 `size` 字节的请求新建 staging buffer 时实际使用的尺寸
    #[inline]
    pub fn staging_allocation_size(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        let rounded = size.max(self.min_staging_buffer_size).min(self.max_staging_buffer_size);
        size.max(rounded)
    }
}
