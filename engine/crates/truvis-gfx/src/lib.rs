//! Truvis 的 GFX 层
//!
//! 在 Vulkan 之上提供 GPU 资源的生命周期管理：
//! - [`foundation`]: 设备接口 [`foundation::device_functions::DeviceFunctions`] 及其实现
//! - [`transfer`]: 多线程的上传、拷贝、layout 转换与 mipmap 生成
//! - [`descriptors`]: descriptor set layout 的结构化去重缓存、池分配与按名字写入
//!
//! 所有对象都持有一个 [`foundation::context::GfxContext`]，不依赖全局单例。

pub mod commands;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod resources;
pub mod transfer;
