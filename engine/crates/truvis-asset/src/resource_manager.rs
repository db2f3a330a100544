use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use truvis_gfx::descriptors::binding::DescriptorSetSchema;
use truvis_gfx::descriptors::layout_cache::DescriptorSetLayoutCache;
use truvis_gfx::descriptors::pool_allocator::{DescriptorPoolAllocator, DescriptorPoolConfig};
use truvis_gfx::error::GfxError;
use truvis_gfx::foundation::context::GfxContext;
use truvis_gfx::resources::shader_module::GfxShaderModule;

use crate::cache::{BatchLoad, LoadFuture, LoadSlot, ResourceCache};
use crate::error::{AssetError, AssetResult};
use crate::loader::{BuiltinMeshDecoder, BuiltinTextureDecoder, MeshDecoder, TextureDecoder};
use crate::mesh::MeshData;
use crate::resource_id::ResourceId;
use crate::shader::{NagaReflector, ShaderProgram, ShaderReflector, ShaderStage, merge_stage_bindings};
use crate::texture::TextureData;
use crate::vertex::Vertex;

pub const DEFAULT_CUBE: &str = "default_cube";
pub const DEFAULT_WHITE: &str = "default_white";

/// 资源管理器的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagerConfig {
    /// 后台解码线程数，线程名为 `Asset-Loader-{i}`
    pub loader_threads: usize,
    /// `get_shader_descriptor_schemas` 扫描的 set 范围 `0..max_descriptor_set_index`
    pub max_descriptor_set_index: u32,
    /// 构造时注册 `default_cube` 与 `default_white`
    pub register_defaults: bool,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            loader_threads: 4,
            max_descriptor_set_index: 8,
            register_defaults: true,
        }
    }
}

impl ResourceManagerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// 资源管理器使用的外部解码器
#[derive(Clone)]
pub struct AssetDecoders {
    pub mesh: Arc<dyn MeshDecoder>,
    pub texture: Arc<dyn TextureDecoder>,
    pub reflector: Arc<dyn ShaderReflector>,
}

impl Default for AssetDecoders {
    fn default() -> Self {
        Self {
            mesh: Arc::new(BuiltinMeshDecoder),
            texture: Arc::new(BuiltinTextureDecoder),
            reflector: Arc::new(NagaReflector),
        }
    }
}

/// 管理器与后台加载任务共享的状态
struct ResourceStore {
    ctx: GfxContext,
    config: ResourceManagerConfig,
    decoders: AssetDecoders,

    meshes: ResourceCache<Vec<MeshData>>,
    textures: ResourceCache<TextureData>,
    shaders: ResourceCache<ShaderProgram>,
    /// 着色器的 prefix -> 路径 id，两个名字指向同一个 program，需要一起卸载
    shader_aliases: Mutex<HashMap<String, ResourceId>>,

    layout_cache: DescriptorSetLayoutCache,
    pool_allocator: DescriptorPoolAllocator,
    /// key -> 按 schema 顺序分配的 descriptor set
    descriptor_sets: Mutex<HashMap<String, Vec<vk::DescriptorSet>>>,
}

// 缓存选择，用于后台任务
impl ResourceStore {
    fn mesh_cache(&self) -> &ResourceCache<Vec<MeshData>> {
        &self.meshes
    }

    fn texture_cache(&self) -> &ResourceCache<TextureData> {
        &self.textures
    }

    fn shader_cache(&self) -> &ResourceCache<ShaderProgram> {
        &self.shaders
    }
}

// 解码与发布
impl ResourceStore {
    fn decode_mesh(&self, path: &Path, id: ResourceId) -> AssetResult<ResourceId> {
        let _span = tracy_client::span!("ResourceManager::decode_mesh");
        let meshes = self.decoders.mesh.decode(path).map_err(|e| AssetError::from_decoder(path, e))?;
        let meshes = meshes.into_iter().filter(|mesh| mesh.is_valid()).collect::<Vec<_>>();
        if meshes.is_empty() {
            return Err(AssetError::Decode(format!("{}: no usable geometry", path.display())));
        }

        log::info!("mesh loaded: {} ({} sub-meshes)", id, meshes.len());
        self.meshes.publish(id.clone(), Arc::new(meshes));
        Ok(id)
    }

    fn decode_texture(&self, path: &Path, id: ResourceId) -> AssetResult<ResourceId> {
        let _span = tracy_client::span!("ResourceManager::decode_texture");
        let texture = self.decoders.texture.decode(path).map_err(|e| AssetError::from_decoder(path, e))?;
        if !texture.is_valid() {
            return Err(AssetError::Decode(format!("{}: no usable pixels", path.display())));
        }

        log::info!("texture loaded: {} ({}x{})", id, texture.width, texture.height);
        self.textures.publish(id.clone(), Arc::new(texture));
        Ok(id)
    }

    /// 读取 `<dir>/<prefix>.<stage>.spv`，反射并合并 binding，注册 schema 后发布
    fn build_shader(&self, dir: &Path, prefix: &str, enable_compute: bool, id: ResourceId) -> AssetResult<ResourceId> {
        let _span = tracy_client::span!("ResourceManager::build_shader");
        let mut stages = vec![ShaderStage::Vertex, ShaderStage::Fragment];
        if enable_compute {
            stages.push(ShaderStage::Compute);
        }

        let mut program = ShaderProgram::default();
        let mut reflected = Vec::with_capacity(stages.len());
        for stage in stages {
            let file_name = format!("{prefix}.{}", stage.file_suffix());
            let path = dir.join(&file_name);
            let code = read_spirv(&path)?;

            let bindings = {
                let _span = tracy_client::span!("ResourceManager::reflect");
                self.decoders
                    .reflector
                    .reflect(&code, stage.vk_stage())
                    .map_err(|e| AssetError::from_decoder(&path, e))?
            };
            reflected.push(bindings);

            let module = GfxShaderModule::new(&self.ctx, &code, stage.vk_stage(), file_name)?;
            program.set_stage(stage, Arc::new(module));
        }

        let merged = merge_stage_bindings(&reflected)?;
        for (set_index, bindings) in merged {
            if bindings.is_empty() {
                continue;
            }
            self.layout_cache.register_layout(prefix, set_index, bindings)?;
        }

        log::info!("shader loaded: {} as {}", id, prefix);
        let program = Arc::new(program);
        // 先锁别名表，再访问缓存，与卸载的加锁顺序一致
        let mut aliases = self.shader_aliases.lock();
        aliases.entry(prefix.to_string()).or_insert_with(|| id.clone());
        self.shaders.publish(ResourceId::named(prefix), program.clone());
        self.shaders.publish(id.clone(), program);
        Ok(id)
    }
}

/// 网格、纹理与着色器的加载缓存
///
/// - 以规范化的绝对路径作为 id，同一文件的不同写法只会解码一次
/// - 同步与异步加载共用单飞机制：同一个 id 同时最多只有一次解码
/// - 不负责上传到 GPU，上传由调用方通过 `TransferManager` 安排
pub struct ResourceManager {
    store: Arc<ResourceStore>,
    loader_pool: rayon::ThreadPool,
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        log::info!("Dropping ResourceManager");
        self.cleanup();
    }
}

// init & destroy
impl ResourceManager {
    pub fn new(ctx: &GfxContext, config: ResourceManagerConfig) -> AssetResult<Self> {
        Self::with_decoders(ctx, config, AssetDecoders::default())
    }

    pub fn with_decoders(
        ctx: &GfxContext,
        config: ResourceManagerConfig,
        decoders: AssetDecoders,
    ) -> AssetResult<Self> {
        let loader_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.loader_threads.max(1))
            .thread_name(|i| format!("Asset-Loader-{i}"))
            .panic_handler(|_| log::error!("asset loader task panicked"))
            .build()
            .map_err(|e| AssetError::LoaderPool(e.to_string()))?;

        let manager = Self {
            store: Arc::new(ResourceStore {
                ctx: ctx.clone(),
                config,
                decoders,
                meshes: ResourceCache::new("mesh"),
                textures: ResourceCache::new("texture"),
                shaders: ResourceCache::new("shader"),
                shader_aliases: Mutex::new(HashMap::new()),
                layout_cache: DescriptorSetLayoutCache::new(ctx),
                pool_allocator: DescriptorPoolAllocator::new(ctx, DescriptorPoolConfig::default()),
                descriptor_sets: Mutex::new(HashMap::new()),
            }),
            loader_pool,
        };
        if manager.store.config.register_defaults {
            manager.register_defaults();
        }

        log::info!("ResourceManager created: {:?}", manager.store.config);
        Ok(manager)
    }

    fn register_defaults(&self) {
        let cube = MeshData::cube(1.0, glam::Vec4::ONE);
        self.store.meshes.publish(ResourceId::named(DEFAULT_CUBE), Arc::new(vec![cube]));

        let mut white = TextureData::solid_color(4, 4, [255, 255, 255, 255]);
        white.name = DEFAULT_WHITE.to_string();
        self.store.textures.publish(ResourceId::named(DEFAULT_WHITE), Arc::new(white));
    }

    /// 清空所有缓存，销毁 descriptor pool 与 layout
    ///
    /// 之前分配的 descriptor set 与 schema 中的 layout handle 全部失效；正在进行的解码不会被取消
    pub fn cleanup(&self) {
        let store = &self.store;
        store.descriptor_sets.lock().clear();
        store.pool_allocator.cleanup();
        store.layout_cache.cleanup();
        store.shader_aliases.lock().clear();
        store.shaders.clear();
        store.meshes.clear();
        store.textures.clear();
    }
}

// getters
impl ResourceManager {
    #[inline]
    pub fn context(&self) -> &GfxContext {
        &self.store.ctx
    }

    #[inline]
    pub fn config(&self) -> &ResourceManagerConfig {
        &self.store.config
    }

    #[inline]
    pub fn layout_cache(&self) -> &DescriptorSetLayoutCache {
        &self.store.layout_cache
    }

    #[inline]
    pub fn pool_allocator(&self) -> &DescriptorPoolAllocator {
        &self.store.pool_allocator
    }

    /// 不阻塞，不解码；先按原样查找，再按规范化路径查找
    pub fn get_mesh(&self, id: &str) -> Option<Arc<Vec<MeshData>>> {
        lookup(&self.store.meshes, id)
    }

    pub fn get_texture(&self, id: &str) -> Option<Arc<TextureData>> {
        lookup(&self.store.textures, id)
    }

    /// 先按前缀查找，再按 `<dir>/<prefix>` 的规范化路径查找
    pub fn get_shader_program(&self, name: &str) -> Option<Arc<ShaderProgram>> {
        lookup(&self.store.shaders, name)
    }

    pub fn is_mesh_loading(&self, id: &str) -> bool {
        self.store.meshes.is_loading(id)
    }
}

// 网格
impl ResourceManager {
    /// 同步加载网格文件
    ///
    /// # 返回值
    /// 规范化后的 id；已经加载过时直接返回，不会重新解码
    pub fn load_mesh(&self, path: impl AsRef<Path>) -> AssetResult<ResourceId> {
        let path = path.as_ref();
        check_exists(path)?;
        let id = ResourceId::from_path(path)?;
        load_single_flight(&self.store.meshes, id, |id| self.store.decode_mesh(path, id))
    }

    /// 异步加载网格文件，同一个 id 的并发请求共享同一个 future
    pub fn load_mesh_async(&self, path: impl AsRef<Path>) -> LoadFuture<ResourceId> {
        let path = path.as_ref().to_path_buf();
        let id = match check_exists(&path).and_then(|()| ResourceId::from_path(&path)) {
            Ok(id) => id,
            Err(e) => return LoadFuture::ready(Err(e)),
        };
        self.spawn_load(ResourceStore::mesh_cache, id, move |store, id| store.decode_mesh(&path, id))
    }

    /// 批量异步加载，结果顺序与 `paths` 一致
    pub fn load_meshes_async<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> BatchLoad {
        BatchLoad::new(paths.into_iter().map(|path| self.load_mesh_async(path)).collect())
    }

    /// 注册程序生成的网格；同名已存在时返回已有的数据，不会覆盖
    pub fn register_mesh(
        &self,
        name: impl Into<String>,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
    ) -> Arc<Vec<MeshData>> {
        let name = name.into();
        let mesh = MeshData {
            name: name.clone(),
            vertices,
            indices,
        };
        self.store.meshes.publish(ResourceId::named(name), Arc::new(vec![mesh]))
    }

    /// `id` 可以是加载时返回的 id，也可以是同一文件的任意路径写法
    pub fn unload_mesh(&self, id: &str) -> bool {
        unload_key(&self.store.meshes, id)
    }
}

// 纹理
impl ResourceManager {
    pub fn load_texture(&self, path: impl AsRef<Path>) -> AssetResult<ResourceId> {
        let path = path.as_ref();
        check_exists(path)?;
        let id = ResourceId::from_path(path)?;
        load_single_flight(&self.store.textures, id, |id| self.store.decode_texture(path, id))
    }

    pub fn load_texture_async(&self, path: impl AsRef<Path>) -> LoadFuture<ResourceId> {
        let path = path.as_ref().to_path_buf();
        let id = match check_exists(&path).and_then(|()| ResourceId::from_path(&path)) {
            Ok(id) => id,
            Err(e) => return LoadFuture::ready(Err(e)),
        };
        self.spawn_load(ResourceStore::texture_cache, id, move |store, id| store.decode_texture(&path, id))
    }

    pub fn load_textures_async<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> BatchLoad {
        BatchLoad::new(paths.into_iter().map(|path| self.load_texture_async(path)).collect())
    }

    /// 已存在同名纹理时返回已有的纹理
    pub fn register_texture(&self, name: impl Into<String>, texture: TextureData) -> Arc<TextureData> {
        self.store.textures.publish(ResourceId::named(name), Arc::new(texture))
    }

    pub fn unload_texture(&self, id: &str) -> bool {
        unload_key(&self.store.textures, id)
    }
}

// 着色器
impl ResourceManager {
    /// 加载 `<dir>/<prefix>.vert.spv` 与 `<dir>/<prefix>.frag.spv`，以及可选的 `<dir>/<prefix>.comp.spv`
    ///
    /// 各 stage 的 binding 合并后以 `prefix` 为名注册到 layout cache
    ///
    /// # 返回值
    /// `<dir>/<prefix>` 的规范化 id；program 同时以 `prefix` 发布
    pub fn load_shader(&self, dir: impl AsRef<Path>, prefix: &str, enable_compute: bool) -> AssetResult<ResourceId> {
        let dir = dir.as_ref();
        check_exists(dir)?;
        let id = ResourceId::from_path(dir.join(prefix))?;
        load_single_flight(&self.store.shaders, id, |id| self.store.build_shader(dir, prefix, enable_compute, id))
    }

    pub fn load_shader_async(
        &self,
        dir: impl AsRef<Path>,
        prefix: &str,
        enable_compute: bool,
    ) -> LoadFuture<ResourceId> {
        let dir = dir.as_ref().to_path_buf();
        let id = match check_exists(&dir).and_then(|()| ResourceId::from_path(dir.join(prefix))) {
            Ok(id) => id,
            Err(e) => return LoadFuture::ready(Err(e)),
        };
        let prefix = prefix.to_string();
        self.spawn_load(ResourceStore::shader_cache, id, move |store, id| {
            store.build_shader(&dir, &prefix, enable_compute, id)
        })
    }

    /// 按 prefix 或路径卸载，program 的两个名字同时移除
    pub fn unload_shader(&self, name: &str) -> bool {
        let store = &self.store;
        let mut aliases = store.shader_aliases.lock();
        let id = aliases.get(name).cloned().or_else(|| ResourceId::from_path(name).ok());

        let mut removed = store.shaders.unload(name);
        if let Some(id) = id {
            removed |= store.shaders.unload(id.as_str());
            let prefixes = aliases.iter().filter(|(_, target)| **target == id).map(|(p, _)| p.clone()).collect_vec();
            for prefix in prefixes {
                aliases.remove(&prefix);
                removed |= store.shaders.unload(&prefix);
            }
        }
        removed
    }
}

// descriptor
impl ResourceManager {
    /// 以 `prefix` 注册的所有 schema，按 set 升序
    pub fn get_shader_descriptor_schemas(&self, prefix: &str) -> Vec<Arc<DescriptorSetSchema>> {
        (0..self.store.config.max_descriptor_set_index)
            .filter_map(|set_index| self.store.layout_cache.get_schema(prefix, set_index))
            .collect()
    }

    /// 为每个 schema 分配一个 descriptor set，并以 `key` 缓存
    ///
    /// # 返回值
    /// 与 `schemas` 顺序一致；同一个 `key` 再次调用返回缓存的 set
    pub fn get_or_allocate_descriptor_set(
        &self,
        schemas: &[Arc<DescriptorSetSchema>],
        key: &str,
    ) -> AssetResult<Vec<vk::DescriptorSet>> {
        if schemas.is_empty() {
            return Err(GfxError::AllocationFailure(format!("no descriptor set schemas for {key}")).into());
        }
        if let Some(sets) = self.store.descriptor_sets.lock().get(key) {
            return Ok(sets.clone());
        }

        let sets = schemas
            .iter()
            .map(|schema| self.store.pool_allocator.allocate_one(schema))
            .collect::<Result<Vec<_>, _>>()?;
        let mut cached = self.store.descriptor_sets.lock();
        Ok(cached.entry(key.to_string()).or_insert(sets).clone())
    }
}

// 内部工具
impl ResourceManager {
    /// 单飞地在加载线程池中执行 `produce`
    ///
    /// 任务结束时（包括失败与 panic）从 loading 中移除自己的记录，然后完成 future
    fn spawn_load<T, F>(
        &self,
        select: fn(&ResourceStore) -> &ResourceCache<T>,
        id: ResourceId,
        produce: F,
    ) -> LoadFuture<ResourceId>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&ResourceStore, ResourceId) -> AssetResult<ResourceId> + Send + 'static,
    {
        let (future, promise) = match select(&self.store).begin_load(&id) {
            LoadSlot::Loaded(id) => return LoadFuture::ready(Ok(id)),
            LoadSlot::Joined(future) => return future,
            LoadSlot::Started(future, promise) => (future, promise),
        };

        let store = self.store.clone();
        let task_future = future.clone();
        self.loader_pool.spawn(move || {
            let store: &ResourceStore = &store;
            let cache = select(store);
            let result = {
                let _loading = scopeguard::guard((), |()| cache.finish_load(&id, &task_future));
                produce(store, id.clone())
            };
            promise.complete(result);
        });
        future
    }
}

/// 在调用线程上执行加载；已有同 id 的加载时等待它的结果
fn load_single_flight<T>(
    cache: &ResourceCache<T>,
    id: ResourceId,
    produce: impl FnOnce(ResourceId) -> AssetResult<ResourceId>,
) -> AssetResult<ResourceId> {
    match cache.begin_load(&id) {
        LoadSlot::Loaded(id) => {
            log::debug!("{} cache hit: {}", cache.kind(), id);
            Ok(id)
        }
        LoadSlot::Joined(future) => future.wait(),
        LoadSlot::Started(future, promise) => {
            let result = {
                let _loading = scopeguard::guard((), |()| cache.finish_load(&id, &future));
                produce(id.clone())
            };
            promise.complete(result.clone());
            result
        }
    }
}

fn lookup<T>(cache: &ResourceCache<T>, key: &str) -> Option<Arc<T>> {
    cache.get(key).or_else(|| {
        let id = ResourceId::from_path(key).ok()?;
        cache.get(id.as_str())
    })
}

/// 先按原样卸载，再按规范化之后的路径卸载
fn unload_key<T>(cache: &ResourceCache<T>, key: &str) -> bool {
    cache.unload(key) || ResourceId::from_path(key).is_ok_and(|id| cache.unload(id.as_str()))
}

fn check_exists(path: &Path) -> AssetResult<()> {
    match path.try_exists() {
        Ok(true) => Ok(()),
        Ok(false) => Err(AssetError::not_found(path)),
        Err(e) => Err(AssetError::io(path, e)),
    }
}

/// 读取 SPIR-V 文件，按小端转换为 u32
fn read_spirv(path: &Path) -> AssetResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| AssetError::io(path, e))?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(AssetError::Decode(format!("{}: invalid spir-v size {}", path.display(), bytes.len())));
    }
    Ok(bytes.chunks_exact(4).map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]])).collect())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use truvis_gfx::descriptors::binding::DescriptorBindingInfo;
    use truvis_gfx::foundation::headless::HeadlessDevice;

    use super::*;
    use crate::shader::SetBindings;

    const TRIANGLE_OBJ: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";

    /// 统计解码次数，路径中包含 "bad" 时失败
    #[derive(Default)]
    struct CountingMeshDecoder {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl MeshDecoder for CountingMeshDecoder {
        fn decode(&self, path: &Path) -> anyhow::Result<Vec<MeshData>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            anyhow::ensure!(!path.to_string_lossy().contains("bad"), "rejected by test decoder");
            BuiltinMeshDecoder.decode(path)
        }
    }

    struct EmptyMeshDecoder;

    impl MeshDecoder for EmptyMeshDecoder {
        fn decode(&self, _path: &Path) -> anyhow::Result<Vec<MeshData>> {
            Ok(vec![MeshData::default()])
        }
    }

    /// vertex 与 fragment 共用 set 0 的 uniform buffer，fragment 额外使用 set 1 的纹理
    struct TableReflector {
        fragment_count: u32,
    }

    impl ShaderReflector for TableReflector {
        fn reflect(&self, _spirv: &[u32], stage: vk::ShaderStageFlags) -> anyhow::Result<SetBindings> {
            let mut sets = SetBindings::new();
            let (name, count) = if stage == vk::ShaderStageFlags::VERTEX {
                ("camera", 1)
            } else {
                ("view", self.fragment_count)
            };
            sets.insert(0, vec![DescriptorBindingInfo::new(name, 0, vk::DescriptorType::UNIFORM_BUFFER, count, stage)]);
            if stage == vk::ShaderStageFlags::FRAGMENT {
                sets.insert(
                    1,
                    vec![DescriptorBindingInfo::new("albedo", 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, stage)],
                );
            }
            Ok(sets)
        }
    }

    fn manager_with(decoders: AssetDecoders) -> (ResourceManager, Arc<HeadlessDevice>) {
        truvis_crate_tools::init_log::init_test_log();
        let (ctx, device) = GfxContext::headless();
        let manager = ResourceManager::with_decoders(&ctx, ResourceManagerConfig::default(), decoders).unwrap();
        (manager, device)
    }

    fn counting_manager(delay: Duration) -> (ResourceManager, Arc<CountingMeshDecoder>) {
        let counter = Arc::new(CountingMeshDecoder {
            calls: AtomicUsize::new(0),
            delay,
        });
        let decoders = AssetDecoders {
            mesh: counter.clone(),
            ..Default::default()
        };
        (manager_with(decoders).0, counter)
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn write_shader_stages(dir: &Path, prefix: &str) {
        // 内容只需要是 4 字节对齐的 SPIR-V 字
        let code = [0x0723_0203u32, 0x0001_0000].iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<_>>();
        write_file(dir, &format!("{prefix}.vert.spv"), &code);
        write_file(dir, &format!("{prefix}.frag.spv"), &code);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = ResourceManagerConfig::from_json_str(r#"{ "loader_threads": 2 }"#).unwrap();
        assert_eq!(config.loader_threads, 2);
        assert_eq!(config.max_descriptor_set_index, 8);
        assert!(config.register_defaults);
    }

    #[test]
    fn test_defaults_registered() {
        let (manager, _device) = manager_with(AssetDecoders::default());
        let cube = manager.get_mesh(DEFAULT_CUBE).unwrap();
        assert_eq!(cube[0].vertices.len(), 24);
        let white = manager.get_texture(DEFAULT_WHITE).unwrap();
        assert_eq!((white.width, white.height, white.channels), (4, 4, 4));

        let (ctx, _device) = GfxContext::headless();
        let config = ResourceManagerConfig {
            register_defaults: false,
            ..Default::default()
        };
        let bare = ResourceManager::new(&ctx, config).unwrap();
        assert!(bare.get_mesh(DEFAULT_CUBE).is_none());
    }

    #[test]
    fn test_register_mesh_first_wins() {
        let (manager, _device) = manager_with(AssetDecoders::default());
        let vertices = vec![Vertex::default(); 3];
        manager.register_mesh("cube", vertices, vec![0, 1, 2]);
        assert_eq!(manager.get_mesh("cube").unwrap()[0].vertices.len(), 3);

        let second = manager.register_mesh("cube", vec![Vertex::default(); 6], vec![]);
        assert_eq!(second[0].vertices.len(), 3);
    }

    #[test]
    fn test_unload_missing_returns_false() {
        let (manager, _device) = manager_with(AssetDecoders::default());
        assert!(!manager.unload_mesh("missing-id"));
        assert!(manager.unload_mesh(DEFAULT_CUBE));
        assert!(manager.get_mesh(DEFAULT_CUBE).is_none());
    }

    #[test]
    fn test_load_deduplicates_spellings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let path = write_file(dir.path(), "tri.obj", TRIANGLE_OBJ.as_bytes());
        let (manager, counter) = counting_manager(Duration::ZERO);

        let first = manager.load_mesh(&path).unwrap();
        let second = manager.load_mesh(dir.path().join("sub").join("..").join(".").join("tri.obj")).unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        let mesh = manager.get_mesh(first.as_str()).unwrap();
        assert_eq!(mesh[0].vertices.len(), 3);
        // 也可以用原始路径查找
        assert!(manager.get_mesh(&path.to_string_lossy()).is_some());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _device) = manager_with(AssetDecoders {
            mesh: Arc::new(EmptyMeshDecoder),
            ..Default::default()
        });

        let missing = dir.path().join("missing.obj");
        assert!(matches!(manager.load_mesh(&missing), Err(AssetError::NotFound { .. })));
        assert!(matches!(manager.load_mesh_async(&missing).wait(), Err(AssetError::NotFound { .. })));

        let path = write_file(dir.path(), "empty.obj", TRIANGLE_OBJ.as_bytes());
        assert!(matches!(manager.load_mesh(&path), Err(AssetError::Decode(_))));
        assert!(!manager.is_mesh_loading(ResourceId::from_path(&path).unwrap().as_str()));
    }

    #[test]
    fn test_single_flight_async() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "tri.obj", TRIANGLE_OBJ.as_bytes());
        let (manager, counter) = counting_manager(Duration::from_millis(50));

        let futures = std::thread::scope(|s| {
            let handles = (0..8).map(|_| s.spawn(|| manager.load_mesh_async(&path))).collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        let expected = ResourceId::from_path(&path).unwrap();
        for future in &futures {
            assert_eq!(future.wait().unwrap(), expected);
        }
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        // 同步加载命中缓存
        assert_eq!(manager.load_mesh(&path).unwrap(), expected);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(dir.path(), "good.obj", TRIANGLE_OBJ.as_bytes());
        let bad = write_file(dir.path(), "bad.obj", TRIANGLE_OBJ.as_bytes());
        let (manager, counter) = counting_manager(Duration::from_millis(10));

        let bad_future = manager.load_mesh_async(&bad);
        let good_future = manager.load_mesh_async(&good);
        assert!(matches!(bad_future.wait(), Err(AssetError::Decode(_))));
        assert!(good_future.wait().is_ok());

        let bad_id = ResourceId::from_path(&bad).unwrap();
        assert!(manager.get_mesh(bad_id.as_str()).is_none());
        assert!(!manager.is_mesh_loading(bad_id.as_str()));

        // 失败的 id 可以重新加载
        assert!(manager.load_mesh_async(&bad).wait().is_err());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_batch_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ["c.obj", "a.obj", "b.obj"].map(|name| write_file(dir.path(), name, TRIANGLE_OBJ.as_bytes()));
        let (manager, _device) = manager_with(AssetDecoders::default());

        let ids = manager.load_meshes_async(&paths).wait().unwrap();
        let expected = paths.iter().map(|p| ResourceId::from_path(p).unwrap()).collect::<Vec<_>>();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_texture_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbaImage::from_pixel(2, 3, image::Rgba([255, 0, 0, 255])).save(&path).unwrap();
        let (manager, _device) = manager_with(AssetDecoders::default());

        let id = manager.load_texture_async(&path).wait().unwrap();
        let texture = manager.get_texture(id.as_str()).unwrap();
        assert_eq!((texture.width, texture.height), (2, 3));
        assert_eq!(&texture.pixels[..4], &[255, 0, 0, 255]);
        assert!(manager.unload_texture(&path.to_string_lossy()));
        assert!(manager.get_texture(id.as_str()).is_none());

        // 同名注册不会覆盖
        let first = manager.register_texture("tint", TextureData::solid_color(1, 1, [1, 2, 3, 4]));
        let second = manager.register_texture("tint", TextureData::solid_color(2, 2, [0; 4]));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_shader_load_registers_merged_schemas() {
        let dir = tempfile::tempdir().unwrap();
        write_shader_stages(dir.path(), "lit");
        let (manager, device) = manager_with(AssetDecoders {
            reflector: Arc::new(TableReflector { fragment_count: 1 }),
            ..Default::default()
        });

        let id = manager.load_shader(dir.path(), "lit", false).unwrap();
        assert_eq!(device.live_shader_module_count(), 2);

        let by_prefix = manager.get_shader_program("lit").unwrap();
        let by_path = manager.get_shader_program(id.as_str()).unwrap();
        assert!(Arc::ptr_eq(&by_prefix, &by_path));
        assert!(by_prefix.is_valid());
        assert!(!by_prefix.has_compute());

        let schemas = manager.get_shader_descriptor_schemas("lit");
        assert_eq!(schemas.len(), 2);
        let camera = &schemas[0].bindings[0];
        assert_eq!(camera.name, "camera");
        assert_eq!(camera.stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(schemas[1].set_index, 1);

        // 再次加载命中缓存
        assert_eq!(manager.load_shader_async(dir.path(), "lit", false).wait().unwrap(), id);
        assert_eq!(device.live_shader_module_count(), 2);

        drop((by_prefix, by_path));
        manager.cleanup();
        assert_eq!(device.live_shader_module_count(), 0);
        assert!(manager.get_shader_descriptor_schemas("lit").is_empty());
    }

    #[test]
    fn test_unload_shader_removes_both_names() {
        let dir = tempfile::tempdir().unwrap();
        write_shader_stages(dir.path(), "lit");
        let (manager, device) = manager_with(AssetDecoders {
            reflector: Arc::new(TableReflector { fragment_count: 1 }),
            ..Default::default()
        });

        // 按路径卸载
        let id = manager.load_shader(dir.path(), "lit", false).unwrap();
        assert!(manager.unload_shader(id.as_str()));
        assert!(manager.get_shader_program("lit").is_none());
        assert!(manager.get_shader_program(id.as_str()).is_none());
        assert_eq!(device.live_shader_module_count(), 0);

        // 重新加载之后两个名字指向新的 program
        let id = manager.load_shader(dir.path(), "lit", false).unwrap();
        let by_prefix = manager.get_shader_program("lit").unwrap();
        let by_path = manager.get_shader_program(id.as_str()).unwrap();
        assert!(Arc::ptr_eq(&by_prefix, &by_path));
        drop((by_prefix, by_path));

        // 按 prefix 卸载
        assert!(manager.unload_shader("lit"));
        assert!(manager.get_shader_program(id.as_str()).is_none());
        assert!(!manager.unload_shader("lit"));
        assert_eq!(device.live_shader_module_count(), 0);
    }

    #[test]
    fn test_unload_accepts_any_spelling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let path = write_file(dir.path(), "tri.obj", TRIANGLE_OBJ.as_bytes());
        let (manager, counter) = counting_manager(Duration::ZERO);

        let id = manager.load_mesh(&path).unwrap();
        assert!(manager.unload_mesh(&dir.path().join("sub").join("..").join("tri.obj").to_string_lossy()));
        assert!(manager.get_mesh(id.as_str()).is_none());

        // 卸载之后重新解码
        manager.load_mesh(&path).unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
        assert!(manager.unload_mesh(&path.to_string_lossy()));
        assert!(!manager.unload_mesh(id.as_str()));
    }

    #[test]
    fn test_shader_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_shader_stages(dir.path(), "lit");
        let (manager, _device) = manager_with(AssetDecoders {
            reflector: Arc::new(TableReflector { fragment_count: 4 }),
            ..Default::default()
        });

        assert!(matches!(manager.load_shader(dir.path(), "lit", false), Err(AssetError::BindingConflict { .. })));
        assert!(manager.get_shader_program("lit").is_none());

        // 缺少 compute stage
        assert!(matches!(manager.load_shader(dir.path(), "lit", true), Err(AssetError::NotFound { .. })));

        write_file(dir.path(), "odd.vert.spv", &[1, 2, 3]);
        write_file(dir.path(), "odd.frag.spv", &[1, 2, 3, 4]);
        assert!(matches!(manager.load_shader(dir.path(), "odd", false), Err(AssetError::Decode(_))));
    }

    #[test]
    fn test_descriptor_sets_cached_per_key() {
        let dir = tempfile::tempdir().unwrap();
        write_shader_stages(dir.path(), "lit");
        let (manager, device) = manager_with(AssetDecoders {
            reflector: Arc::new(TableReflector { fragment_count: 1 }),
            ..Default::default()
        });
        manager.load_shader(dir.path(), "lit", false).unwrap();

        let schemas = manager.get_shader_descriptor_schemas("lit");
        let sets = manager.get_or_allocate_descriptor_set(&schemas, "lit").unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(manager.get_or_allocate_descriptor_set(&schemas, "lit").unwrap(), sets);
        assert_eq!(device.descriptor_pools_created(), 1);

        let other = manager.get_or_allocate_descriptor_set(&schemas, "lit-2").unwrap();
        assert_ne!(other, sets);

        assert!(matches!(
            manager.get_or_allocate_descriptor_set(&[], "empty"),
            Err(AssetError::Gfx(GfxError::AllocationFailure(_)))
        ));
    }
}
