use ash::vk;
use parking_lot::Mutex;

use crate::descriptors::binding::DescriptorSetSchema;
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;

/// 每个描述符池的容量
#[derive(Debug, Clone)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
    pub flags: vk::DescriptorPoolCreateFlags,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        let size = |ty, descriptor_count| vk::DescriptorPoolSize { ty, descriptor_count };
        Self {
            max_sets: 1024,
            pool_sizes: vec![
                size(vk::DescriptorType::SAMPLER, 512),
                size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1024),
                size(vk::DescriptorType::SAMPLED_IMAGE, 1024),
                size(vk::DescriptorType::STORAGE_IMAGE, 512),
                size(vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 256),
                size(vk::DescriptorType::STORAGE_TEXEL_BUFFER, 256),
                size(vk::DescriptorType::UNIFORM_BUFFER, 1024),
                size(vk::DescriptorType::STORAGE_BUFFER, 1024),
                size(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 256),
                size(vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 256),
                size(vk::DescriptorType::INPUT_ATTACHMENT, 256),
            ],
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        }
    }
}

#[derive(Default)]
struct PoolState {
    current: Option<vk::DescriptorPool>,
    /// 已经分配满的池
    used: Vec<vk::DescriptorPool>,
    /// reset 之后可以复用的池
    free: Vec<vk::DescriptorPool>,
}

/// 按需增长的描述符池分配器
///
/// 当前池耗尽时换一个新池重试一次，仍然失败则返回 `AllocationFailure`
pub struct DescriptorPoolAllocator {
    ctx: GfxContext,
    config: DescriptorPoolConfig,
    state: Mutex<PoolState>,
}

impl Drop for DescriptorPoolAllocator {
    fn drop(&mut self) {
        log::info!("Dropping DescriptorPoolAllocator");
        self.cleanup();
    }
}

// init & destroy
impl DescriptorPoolAllocator {
    pub fn new(ctx: &GfxContext, config: DescriptorPoolConfig) -> Self {
        Self {
            ctx: ctx.clone(),
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// 销毁所有的池，从中分配的 set 全部失效
    pub fn cleanup(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pools = state.current.take().into_iter().chain(state.used.drain(..)).chain(state.free.drain(..));
        for pool in pools.collect::<Vec<_>>() {
            self.ctx.destroy_descriptor_pool(pool);
        }
    }
}

// tools
impl DescriptorPoolAllocator {
    /// 按 schema 的 layout 分配 `count` 个 descriptor set
    pub fn allocate(&self, schema: &DescriptorSetSchema, count: u32) -> GfxResult<Vec<vk::DescriptorSet>> {
        let _span = tracy_client::span!("DescriptorPoolAllocator::allocate");
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![schema.layout; count as usize];

        let mut state = self.state.lock();
        let pool = match state.current {
            Some(pool) => pool,
            None => self.grab_pool(&mut state)?,
        };
        match self.ctx.allocate_descriptor_sets(pool, &layouts) {
            Ok(sets) => Ok(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                log::debug!("descriptor pool exhausted, switching to a new pool for {}", schema.name);
                let pool = self.grab_pool(&mut state)?;
                self.ctx
                    .allocate_descriptor_sets(pool, &layouts)
                    .map_err(|e| GfxError::from_alloc_result(e, &format!("descriptor sets for {}", schema.name)))
            }
            Err(e) => Err(GfxError::from_alloc_result(e, &format!("descriptor sets for {}", schema.name))),
        }
    }

    #[inline]
    pub fn allocate_one(&self, schema: &DescriptorSetSchema) -> GfxResult<vk::DescriptorSet> {
        self.allocate(schema, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::AllocationFailure(format!("descriptor set for {}", schema.name)))
    }

    /// reset 所有池并放回空闲列表，已分配的 set 全部失效
    pub fn reset_pools(&self) -> GfxResult<()> {
        let mut state = self.state.lock();
        let pools = state.current.take().into_iter().chain(state.used.drain(..)).collect::<Vec<_>>();
        for pool in pools {
            self.ctx.reset_descriptor_pool(pool).map_err(GfxError::Vulkan)?;
            state.free.push(pool);
        }
        Ok(())
    }

    /// 创建或复用的池总数
    pub fn pool_count(&self) -> usize {
        let state = self.state.lock();
        state.current.iter().count() + state.used.len() + state.free.len()
    }

    /// 将当前池移入 used，并换上一个空闲池或新池
    fn grab_pool(&self, state: &mut PoolState) -> GfxResult<vk::DescriptorPool> {
        if let Some(current) = state.current.take() {
            state.used.push(current);
        }
        let pool = match state.free.pop() {
            Some(pool) => pool,
            None => self
                .ctx
                .create_descriptor_pool(self.config.max_sets, &self.config.pool_sizes, self.config.flags)
                .map_err(|e| GfxError::from_alloc_result(e, "descriptor pool"))?,
        };
        state.current = Some(pool);
        Ok(pool)
    }
}
