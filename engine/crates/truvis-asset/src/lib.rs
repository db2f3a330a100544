//! 资源缓存
//!
//! 负责网格、纹理与着色器的加载与去重：
//! - 以规范化路径为 key 的线程安全缓存，同步与异步（单飞）两种加载方式
//! - 着色器各 stage 的 binding 反射、合并，并注册到 `truvis-gfx` 的 layout cache
//! - 程序生成的默认资源：立方体、球体、纯色与棋盘格纹理

pub mod cache;
pub mod error;
pub mod loader;
pub mod mesh;
pub mod resource_id;
pub mod resource_manager;
pub mod shader;
pub mod texture;
pub mod vertex;
