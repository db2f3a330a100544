use ash::vk;
use slotmap::SlotMap;

use crate::error::GfxResult;
use crate::foundation::context::GfxContext;
use crate::resources::buffer::GfxBuffer;
use crate::transfer::config::TransferManagerConfig;

slotmap::new_key_type! {
    /// staging buffer 的稳定句柄，池子裁剪后依然有效
    pub struct StagingBufferKey;
}

struct StagingBufferInfo {
    buffer: GfxBuffer,
    in_use: bool,
    /// 为 false 时 release 后立即销毁
    pooled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingPoolStats {
    /// 当前存活的 staging buffer
    pub total: usize,
    pub in_use: usize,
    pub pooled: usize,
    /// 累计新建次数
    pub allocations: usize,
    /// 累计归还次数
    pub releases: usize,
}

/// 单个线程的 staging buffer 池
///
/// 正在使用的 buffer 在显式 release 之前不会被第二次分配出去
pub struct StagingBufferPool {
    buffers: SlotMap<StagingBufferKey, StagingBufferInfo>,
    /// 按创建顺序记录，用于从最新创建的开始裁剪
    order: Vec<StagingBufferKey>,

    config: TransferManagerConfig,
    ctx: GfxContext,

    allocations: usize,
    releases: usize,
}

// init
impl StagingBufferPool {
    pub fn new(ctx: &GfxContext, config: &TransferManagerConfig) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            order: Vec::new(),
            config: config.clone(),
            ctx: ctx.clone(),
            allocations: 0,
            releases: 0,
        }
    }
}

// tools
impl StagingBufferPool {
    /// 获取一个至少 `size` 字节的 staging buffer
    ///
    /// 优先复用空闲的池内 buffer，否则新建
    pub fn acquire(&mut self, size: vk::DeviceSize) -> GfxResult<StagingBufferKey> {
        if self.config.enable_staging_buffer_pool {
            let reusable = self
                .order
                .iter()
                .copied()
                .find(|key| self.buffers.get(*key).is_some_and(|b| b.pooled && !b.in_use && b.buffer.size() >= size));
            if let Some(key) = reusable {
                if let Some(info) = self.buffers.get_mut(key) {
                    info.in_use = true;
                }
                return Ok(key);
            }
        }

        let pooled_count = self.buffers.values().filter(|b| b.pooled).count();
        let pooled =
            self.config.enable_staging_buffer_pool && pooled_count < self.config.max_pooled_staging_buffers;
        let alloc_size = self.config.staging_allocation_size(size);
        let buffer = GfxBuffer::new_stage_buffer(&self.ctx, alloc_size, format!("staging-{}", self.allocations))?;
        log::debug!("new staging buffer: {} bytes, pooled: {}", alloc_size, pooled);

        let key = self.buffers.insert(StagingBufferInfo {
            buffer,
            in_use: true,
            pooled,
        });
        self.order.push(key);
        self.allocations += 1;
        Ok(key)
    }

    #[inline]
    pub fn buffer(&self, key: StagingBufferKey) -> Option<&GfxBuffer> {
        self.buffers.get(key).map(|b| &b.buffer)
    }

    /// 归还 buffer：池内的标记为空闲，池外的直接销毁
    pub fn release(&mut self, key: StagingBufferKey) {
        let Some(info) = self.buffers.get_mut(key) else {
            log::warn!("release of unknown staging buffer {:?}", key);
            return;
        };
        if !info.in_use {
            log::warn!("staging buffer {:?} released twice", key);
            return;
        }
        self.releases += 1;
        if info.pooled {
            info.in_use = false;
        } else {
            self.remove(key);
        }
    }

    /// 销毁超出上限的空闲 buffer，从最新创建的开始
    pub fn cleanup_unused_staging_buffers(&mut self) {
        let mut idx = self.order.len();
        while idx > 0 && self.buffers.len() > self.config.max_pooled_staging_buffers {
            idx -= 1;
            let key = self.order[idx];
            if self.buffers.get(key).is_some_and(|b| !b.in_use) {
                self.remove(key);
            }
        }
    }

    fn remove(&mut self, key: StagingBufferKey) {
        self.buffers.remove(key);
        self.order.retain(|k| *k != key);
    }

    /// 销毁所有 buffer，调用方需要保证 GPU 不再使用它们
    pub fn destroy_all(&mut self) {
        self.buffers.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> StagingPoolStats {
        StagingPoolStats {
            total: self.buffers.len(),
            in_use: self.buffers.values().filter(|b| b.in_use).count(),
            pooled: self.buffers.values().filter(|b| b.pooled).count(),
            allocations: self.allocations,
            releases: self.releases,
        }
    }
}
