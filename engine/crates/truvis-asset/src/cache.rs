use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{AssetError, AssetResult};
use crate::resource_id::ResourceId;

struct SharedLoad<T> {
    result: Mutex<Option<AssetResult<T>>>,
    ready: Condvar,
}

/// 可以被多个调用方共同等待的加载结果
///
/// clone 只增加引用计数，所有 clone 观察到同一个结果
pub struct LoadFuture<T> {
    shared: Arc<SharedLoad<T>>,
}

impl<T> Clone for LoadFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for LoadFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadFuture").field("ready", &self.shared.result.lock().is_some()).finish()
    }
}

// init
impl<T: Clone> LoadFuture<T> {
    /// 已经完成的 future
    pub fn ready(result: AssetResult<T>) -> Self {
        Self {
            shared: Arc::new(SharedLoad {
                result: Mutex::new(Some(result)),
                ready: Condvar::new(),
            }),
        }
    }

    /// 尚未完成的 future，以及用于写入结果的 promise
    pub fn pending() -> (Self, LoadPromise<T>) {
        let shared = Arc::new(SharedLoad {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            LoadPromise { shared: Some(shared) },
        )
    }
}

// tools
impl<T: Clone> LoadFuture<T> {
    /// 阻塞直到结果可用
    pub fn wait(&self) -> AssetResult<T> {
        let mut result = self.shared.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.shared.ready.wait(&mut result);
        }
    }

    /// 超时返回 None
    pub fn wait_timeout(&self, timeout: Duration) -> Option<AssetResult<T>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut result = self.shared.result.lock();
        while result.is_none() {
            if self.shared.ready.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.clone()
    }

    /// 不阻塞
    #[inline]
    pub fn try_get(&self) -> Option<AssetResult<T>> {
        self.shared.result.lock().clone()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.result.lock().is_some()
    }

    /// 两个 future 是否指向同一次加载
    #[inline]
    pub fn same_load(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// 一次加载的生产端，只能完成一次
///
/// 未完成就被 drop（例如加载任务 panic）时，future 以 `Decode` 错误结束，等待方不会永远阻塞
pub struct LoadPromise<T> {
    shared: Option<Arc<SharedLoad<T>>>,
}

impl<T> LoadPromise<T> {
    pub fn complete(mut self, result: AssetResult<T>) {
        if let Some(shared) = self.shared.take() {
            Self::publish(&shared, result);
        }
    }

    fn publish(shared: &SharedLoad<T>, result: AssetResult<T>) {
        *shared.result.lock() = Some(result);
        shared.ready.notify_all();
    }
}

impl<T> Drop for LoadPromise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::publish(&shared, Err(AssetError::Decode("load task ended without a result".to_string())));
        }
    }
}

/// 一组异步加载，结果按提交顺序排列
#[derive(Debug, Clone, Default)]
pub struct BatchLoad {
    futures: Vec<LoadFuture<ResourceId>>,
}

impl BatchLoad {
    pub fn new(futures: Vec<LoadFuture<ResourceId>>) -> Self {
        Self { futures }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    #[inline]
    pub fn futures(&self) -> &[LoadFuture<ResourceId>] {
        &self.futures
    }

    pub fn is_ready(&self) -> bool {
        self.futures.iter().all(LoadFuture::is_ready)
    }

    /// 等待全部完成；任意一个失败时返回按顺序遇到的第一个错误
    pub fn wait(&self) -> AssetResult<Vec<ResourceId>> {
        self.futures.iter().map(LoadFuture::wait).collect()
    }
}

/// 开始加载时对缓存的查询结果
pub enum LoadSlot {
    /// 已经加载完成
    Loaded(ResourceId),
    /// 有其他调用方正在加载，加入同一个 future
    Joined(LoadFuture<ResourceId>),
    /// 由调用方负责加载，并在结束时调用 [`ResourceCache::finish_load`]
    Started(LoadFuture<ResourceId>, LoadPromise<ResourceId>),
}

struct CacheState<T> {
    loaded: HashMap<ResourceId, Arc<T>>,
    loading: HashMap<ResourceId, LoadFuture<ResourceId>>,
}

/// 单个资源类型的缓存
///
/// `loaded` 与 `loading` 由同一把锁保护，锁只在读写 map 时持有，不跨越解码。
/// 持有锁的观察者不会看到同一个 id 同时位于两个 map 中。
pub struct ResourceCache<T> {
    kind: &'static str,
    state: Mutex<CacheState<T>>,
}

// init
impl<T> ResourceCache<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(CacheState {
                loaded: HashMap::new(),
                loading: HashMap::new(),
            }),
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        log::info!("clear {} cache: {} loaded, {} loading", self.kind, state.loaded.len(), state.loading.len());
        state.loaded.clear();
        state.loading.clear();
    }
}

// getters
impl<T> ResourceCache<T> {
    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// 不阻塞，不解码
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.state.lock().loaded.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().loaded.contains_key(id)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.state.lock().loading.contains_key(id)
    }
}

// tools
impl<T> ResourceCache<T> {
    /// 发布一个资源；id 已存在时保留先发布的值并返回它
    ///
    /// 同一临界区内移除该 id 的 loading 记录
    pub fn publish(&self, id: ResourceId, value: Arc<T>) -> Arc<T> {
        let mut state = self.state.lock();
        state.loading.remove(&id);
        state.loaded.entry(id).or_insert(value).clone()
    }

    /// 单飞查询：已加载、正在加载、或者由调用方开始加载
    pub fn begin_load(&self, id: &ResourceId) -> LoadSlot {
        let mut state = self.state.lock();
        if state.loaded.contains_key(id) {
            return LoadSlot::Loaded(id.clone());
        }
        if let Some(future) = state.loading.get(id) {
            log::debug!("join in-flight {} load: {}", self.kind, id);
            return LoadSlot::Joined(future.clone());
        }
        let (future, promise) = LoadFuture::pending();
        state.loading.insert(id.clone(), future.clone());
        LoadSlot::Started(future, promise)
    }

    /// 加载任务结束时调用；只移除属于这次加载的记录
    pub fn finish_load(&self, id: &ResourceId, future: &LoadFuture<ResourceId>) {
        let mut state = self.state.lock();
        if state.loading.get(id).is_some_and(|current| current.same_load(future)) {
            state.loading.remove(id);
        }
    }

    /// 从两个 map 中移除，返回是否移除了任何东西
    ///
    /// 不会取消已经开始的解码
    pub fn unload(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let was_loading = state.loading.remove(id).is_some();
        let was_loaded = state.loaded.remove(id).is_some();
        was_loading || was_loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_first_wins() {
        let cache = ResourceCache::<u32>::new("test");
        let first = cache.publish(ResourceId::named("a"), Arc::new(1));
        let second = cache.publish(ResourceId::named("a"), Arc::new(2));
        assert_eq!(*first, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.get("a").as_deref(), Some(&1));
    }

    #[test]
    fn test_single_flight_slots() {
        let cache = ResourceCache::<u32>::new("test");
        let id = ResourceId::named("a");

        let LoadSlot::Started(future, promise) = cache.begin_load(&id) else {
            panic!("first caller should start the load");
        };
        let LoadSlot::Joined(joined) = cache.begin_load(&id) else {
            panic!("second caller should join");
        };
        assert!(joined.same_load(&future));
        assert!(cache.is_loading("a"));

        cache.publish(id.clone(), Arc::new(7));
        // 发布的同时 loading 记录被移除
        assert!(!cache.is_loading("a"));
        promise.complete(Ok(id.clone()));
        cache.finish_load(&id, &future);

        assert_eq!(joined.wait().unwrap(), id);
        assert!(matches!(cache.begin_load(&id), LoadSlot::Loaded(_)));
    }

    #[test]
    fn test_stale_finish_keeps_newer_load() {
        let cache = ResourceCache::<u32>::new("test");
        let id = ResourceId::named("a");

        let LoadSlot::Started(old, _old_promise) = cache.begin_load(&id) else {
            panic!();
        };
        assert!(cache.unload("a"));
        let LoadSlot::Started(new, _new_promise) = cache.begin_load(&id) else {
            panic!();
        };
        cache.finish_load(&id, &old);
        assert!(cache.is_loading("a"));
        cache.finish_load(&id, &new);
        assert!(!cache.is_loading("a"));
    }

    #[test]
    fn test_dropped_promise_fails_waiters() {
        let (future, promise) = LoadFuture::<ResourceId>::pending();
        assert!(future.try_get().is_none());
        assert!(future.wait_timeout(Duration::from_millis(1)).is_none());
        drop(promise);
        assert!(matches!(future.wait(), Err(AssetError::Decode(_))));
    }

    #[test]
    fn test_wait_across_threads() {
        let (future, promise) = LoadFuture::<u32>::pending();
        let waiters = (0..4)
            .map(|_| {
                let future = future.clone();
                std::thread::spawn(move || future.wait().unwrap())
            })
            .collect::<Vec<_>>();
        promise.complete(Ok(42));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 42);
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let (pending, promise) = LoadFuture::pending();
        let batch = BatchLoad::new(vec![
            LoadFuture::ready(Ok(ResourceId::named("b"))),
            pending,
            LoadFuture::ready(Ok(ResourceId::named("a"))),
        ]);
        assert!(!batch.is_ready());
        promise.complete(Ok(ResourceId::named("c")));
        let ids = batch.wait().unwrap();
        assert_eq!(ids.iter().map(ResourceId::as_str).collect::<Vec<_>>(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_unload_missing_returns_false() {
        let cache = ResourceCache::<u32>::new("test");
        assert!(!cache.unload("missing-id"));
    }
}
