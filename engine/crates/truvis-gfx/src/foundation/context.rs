use std::ops::Deref;
use std::sync::Arc;

use crate::foundation::device_functions::DeviceFunctions;

/// 显式构造的 GFX 上下文
///
/// 所有需要访问设备的组件都持有一份 clone，clone 只是增加 Arc 计数。
#[derive(Clone)]
pub struct GfxContext {
    device: Arc<dyn DeviceFunctions>,
}

impl GfxContext {
    #[inline]
    pub fn new(device: impl DeviceFunctions + 'static) -> Self {
        Self {
            device: Arc::new(device),
        }
    }

    #[inline]
    pub fn from_arc(device: Arc<dyn DeviceFunctions>) -> Self {
        Self { device }
    }

    /// 创建基于 `HeadlessDevice` 的上下文，同时返回设备本身，便于测试时注入故障与检查计数
    #[cfg(any(test, feature = "headless"))]
    pub fn headless() -> (Self, Arc<crate::foundation::headless::HeadlessDevice>) {
        let device = Arc::new(crate::foundation::headless::HeadlessDevice::new());
        (Self::from_arc(device.clone()), device)
    }

    #[inline]
    pub fn device(&self) -> &dyn DeviceFunctions {
        self.device.as_ref()
    }
}

impl Deref for GfxContext {
    type Target = dyn DeviceFunctions;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.device.as_ref()
    }
}

impl std::fmt::Debug for GfxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxContext")
            .field("dedicated_transfer_queue", &self.device.has_dedicated_transfer_queue())
            .finish()
    }
}
