use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::commands::fence::GfxFence;
use crate::error::{GfxError, GfxResult};

/// 一次提交的完成状态，由提交记录与所有 token 共享
///
/// fence 归这里所有：只要还有 token 存活，fence 就不会被销毁或复用。
/// 结果一旦确定（成功或失败）就不再改变，之后的查询不再访问 fence
pub(crate) struct TokenState {
    fence: GfxFence,
    /// None 表示尚未确定
    outcome: Mutex<Option<GfxResult<()>>>,
}

impl TokenState {
    pub(crate) fn new(fence: GfxFence) -> Self {
        Self {
            fence,
            outcome: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn fence(&self) -> &GfxFence {
        &self.fence
    }

    /// 没有其他引用时取回 fence 以便复用
    #[inline]
    pub(crate) fn into_fence(self) -> GfxFence {
        self.fence
    }

    #[inline]
    pub(crate) fn outcome(&self) -> Option<GfxResult<()>> {
        self.outcome.lock().clone()
    }

    #[inline]
    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// 记录结果，先记录的结果生效
    ///
    /// # 返回值
    /// 最终生效的结果
    pub(crate) fn settle(&self, result: GfxResult<()>) -> GfxResult<()> {
        self.outcome.lock().get_or_insert(result).clone()
    }
}

/// 异步传输的完成凭证
///
/// 可以 clone 并在多个线程之间传递。状态只会从 Pending 变为 Signaled 或 Failed，
/// `wait` 与 `is_complete` 可以任意次数地调用，失败后每次都返回同一个错误
#[derive(Clone)]
pub struct TransferToken {
    state: Option<Arc<TokenState>>,
}

impl std::fmt::Debug for TransferToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferToken")
            .field("fence", &self.state.as_ref().map(|s| s.fence.handle()))
            .field("outcome", &self.state.as_ref().map_or(Some(Ok(())), |s| s.outcome()))
            .finish()
    }
}

// init
impl TransferToken {
    /// 已经完成的 token，用于不需要提交任何命令的请求
    #[inline]
    pub fn completed() -> Self {
        Self { state: None }
    }

    #[inline]
    pub(crate) fn pending(state: Arc<TokenState>) -> Self {
        Self { state: Some(state) }
    }
}

// tools
impl TransferToken {
    /// 非阻塞地查询传输是否完成
    pub fn is_complete(&self) -> GfxResult<bool> {
        let Some(state) = &self.state else {
            return Ok(true);
        };
        if let Some(outcome) = state.outcome() {
            return outcome.map(|()| true);
        }
        match state.fence.is_signaled() {
            Ok(true) => state.settle(Ok(())).map(|()| true),
            Ok(false) => Ok(false),
            Err(e) => state.settle(Err(Self::fence_failure(e))).map(|()| true),
        }
    }

    /// 阻塞等待传输完成
    ///
    /// # 参数
    /// - timeout: `None` 表示无限等待
    ///
    /// # 返回值
    /// 超时返回 `GfxError::Timeout`，fence 层面的失败返回 `GfxError::DeviceLost`
    pub fn wait(&self, timeout: Option<Duration>) -> GfxResult<()> {
        let _span = tracy_client::span!("TransferToken::wait");
        let Some(state) = &self.state else {
            return Ok(());
        };
        if let Some(outcome) = state.outcome() {
            return outcome;
        }

        let timeout_ns = timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        match state.fence.wait(timeout_ns) {
            Ok(()) => state.settle(Ok(())),
            Err(GfxError::Timeout) => Err(GfxError::Timeout),
            Err(e) => state.settle(Err(Self::fence_failure(e))),
        }
    }

    /// fence 上的失败统一视为设备丢失
    pub(crate) fn fence_failure(err: GfxError) -> GfxError {
        match err {
            GfxError::DeviceLost(_) => err,
            _ => GfxError::DeviceLost(ash::vk::Result::ERROR_DEVICE_LOST),
        }
    }
}
