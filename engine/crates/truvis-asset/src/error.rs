use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use truvis_gfx::error::GfxError;

/// 资源缓存的错误类型
///
/// 需要 `Clone`：异步加载失败时，同一个错误会交给每一个 join 的调用方
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// 解码器没有产出可用的数据
    #[error("decode failed: {0}")]
    Decode(String),

    /// 不同 stage 在同一个 `(set, binding)` 上声明了不一致的 binding
    #[error("binding conflict at set {set_index} binding {binding} ({name}): {reason}")]
    BindingConflict {
        set_index: u32,
        binding: u32,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error("failed to start asset loader threads: {0}")]
    LoaderPool(String),
}

pub type AssetResult<T> = Result<T, AssetError>;

impl AssetError {
    #[inline]
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.to_path_buf(),
        }
    }

    #[inline]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::not_found(path);
        }
        Self::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// 将解码器返回的 `anyhow::Error` 归类
    ///
    /// 根因是 io 错误时归为 `Io`，其余归为 `Decode`，保留完整的 context 链
    pub fn from_decoder(path: &Path, err: anyhow::Error) -> Self {
        let message = format!("{}: {err:#}", path.display());
        match err.downcast::<std::io::Error>() {
            Ok(io) => Self::io(path, io),
            Err(_) => Self::Decode(message),
        }
    }

    pub(crate) fn count_mismatch(set_index: u32, binding: u32, name: &str, first: u32, second: u32) -> Self {
        Self::BindingConflict {
            set_index,
            binding,
            name: name.to_string(),
            reason: format!("descriptor count {first} vs {second}"),
        }
    }

    pub(crate) fn kind_mismatch(
        set_index: u32,
        binding: u32,
        name: &str,
        first: vk::DescriptorType,
        second: vk::DescriptorType,
    ) -> Self {
        Self::BindingConflict {
            set_index,
            binding,
            name: name.to_string(),
            reason: format!("descriptor type {first:?} vs {second:?}"),
        }
    }
}
