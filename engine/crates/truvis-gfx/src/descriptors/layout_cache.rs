use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::descriptors::binding::{DescriptorBindingInfo, DescriptorSetSchema, LayoutKey, canonicalize};
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;

/// 拥有一个 vk::DescriptorSetLayout，drop 时销毁
pub struct GfxDescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    ctx: GfxContext,
    debug_name: String,
}

impl Drop for GfxDescriptorSetLayout {
    fn drop(&mut self) {
        log::debug!("Dropping GfxDescriptorSetLayout: {}", self.debug_name);
        self.ctx.destroy_descriptor_set_layout(self.handle);
    }
}

impl GfxDescriptorSetLayout {
    pub fn new(
        ctx: &GfxContext,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: impl Into<String>,
    ) -> GfxResult<Self> {
        let handle = ctx
            .create_descriptor_set_layout(bindings)
            .map_err(|e| GfxError::from_alloc_result(e, "descriptor set layout"))?;
        Ok(Self {
            handle,
            ctx: ctx.clone(),
            debug_name: debug_name.into(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

#[derive(Default)]
struct LayoutCacheState {
    /// 结构索引，拥有 layout
    layouts: HashMap<LayoutKey, GfxDescriptorSetLayout>,
    /// 名字索引，只引用 layout 的 handle
    schemas: HashMap<(String, u32), Arc<DescriptorSetSchema>>,
}

/// descriptor set layout 的结构化去重缓存
///
/// - 同名同 set 重复注册：结构相同返回已有 schema，结构不同返回 `SchemaConflict`
/// - 不同名字、相同结构：共享同一个 vk::DescriptorSetLayout
/// - 锁只在查找与插入时持有，创建 layout 时不持有
pub struct DescriptorSetLayoutCache {
    ctx: GfxContext,
    state: Mutex<LayoutCacheState>,
}

impl Drop for DescriptorSetLayoutCache {
    fn drop(&mut self) {
        log::info!("Dropping DescriptorSetLayoutCache");
    }
}

// init & destroy
impl DescriptorSetLayoutCache {
    pub fn new(ctx: &GfxContext) -> Self {
        Self {
            ctx: ctx.clone(),
            state: Mutex::new(LayoutCacheState::default()),
        }
    }

    /// 销毁所有 layout；已经分配出去的 schema 中的 layout handle 随之失效
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        state.schemas.clear();
        state.layouts.clear();
    }
}

// getters
impl DescriptorSetLayoutCache {
    pub fn get_schema(&self, name: &str, set_index: u32) -> Option<Arc<DescriptorSetSchema>> {
        self.state.lock().schemas.get(&(name.to_string(), set_index)).cloned()
    }

    pub fn get_layout(&self, name: &str, set_index: u32) -> Option<vk::DescriptorSetLayout> {
        self.get_schema(name, set_index).map(|s| s.layout)
    }

    /// 已注册的 `(name, set_index)` 数量
    pub fn schema_count(&self) -> usize {
        self.state.lock().schemas.len()
    }

    /// 实际创建的 layout 数量
    pub fn layout_count(&self) -> usize {
        self.state.lock().layouts.len()
    }
}

// tools
impl DescriptorSetLayoutCache {
    /// 注册一个 schema
    ///
    /// # 参数
    /// - bindings: 任意顺序，内部会按 binding 排序
    ///
    /// # 返回值
    /// 同名同结构的重复注册返回同一个 `Arc`
    pub fn register_layout(
        &self,
        name: &str,
        set_index: u32,
        bindings: Vec<DescriptorBindingInfo>,
    ) -> GfxResult<Arc<DescriptorSetSchema>> {
        let _span = tracy_client::span!("DescriptorSetLayoutCache::register_layout");
        let bindings = canonicalize(bindings);
        let key = LayoutKey::new(set_index, &bindings);

        {
            let mut state = self.state.lock();
            if let Some(schema) = Self::lookup_existing(&state, name, set_index, &key)? {
                return Ok(schema);
            }
            if let Some(layout) = state.layouts.get(&key).map(GfxDescriptorSetLayout::handle) {
                log::debug!("schema {}#{} aliases an existing layout", name, set_index);
                return Ok(Self::insert_schema(&mut state, name, set_index, layout, bindings));
            }
        }

        let vk_bindings = bindings.iter().map(DescriptorBindingInfo::to_vk_binding).collect_vec();
        let new_layout = GfxDescriptorSetLayout::new(&self.ctx, &vk_bindings, format!("{name}#{set_index}"))?;

        let mut state = self.state.lock();
        // 创建期间其他线程可能已经注册了同名或同结构的 schema
        if let Some(schema) = Self::lookup_existing(&state, name, set_index, &key)? {
            return Ok(schema);
        }
        let layout = match state.layouts.get(&key) {
            Some(existing) => existing.handle(),
            None => {
                let handle = new_layout.handle();
                state.layouts.insert(key, new_layout);
                log::info!("descriptor set layout created: {}#{}", name, set_index);
                handle
            }
        };
        Ok(Self::insert_schema(&mut state, name, set_index, layout, bindings))
    }

    fn lookup_existing(
        state: &LayoutCacheState,
        name: &str,
        set_index: u32,
        key: &LayoutKey,
    ) -> GfxResult<Option<Arc<DescriptorSetSchema>>> {
        match state.schemas.get(&(name.to_string(), set_index)) {
            Some(existing) if existing.layout_key() == *key => Ok(Some(existing.clone())),
            Some(_) => Err(GfxError::SchemaConflict {
                name: name.to_string(),
                set_index,
            }),
            None => Ok(None),
        }
    }

    fn insert_schema(
        state: &mut LayoutCacheState,
        name: &str,
        set_index: u32,
        layout: vk::DescriptorSetLayout,
        bindings: Vec<DescriptorBindingInfo>,
    ) -> Arc<DescriptorSetSchema> {
        let schema = Arc::new(DescriptorSetSchema {
            name: name.to_string(),
            set_index,
            layout,
            bindings,
        });
        state.schemas.insert((name.to_string(), set_index), schema.clone());
        schema
    }
}
