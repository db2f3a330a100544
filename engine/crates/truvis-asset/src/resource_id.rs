use std::borrow::Borrow;
use std::path::{Component, Path, PathBuf};

use crate::error::{AssetError, AssetResult};

/// 资源缓存的 key
///
/// 文件资源使用规范化后的绝对路径，程序化生成的资源使用注册时的名字。
/// 同一个文件的不同写法（相对路径、`./`、`..`）得到同一个 id。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// 程序化资源的 id，不做任何规范化
    #[inline]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// 文件资源的 id：绝对路径 + 词法规范化，不访问文件系统
    pub fn from_path(path: impl AsRef<Path>) -> AssetResult<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|e| AssetError::io(path, e))?;
        Ok(Self(normalize_lexically(&absolute).to_string_lossy().into_owned()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 去掉 `.`，将 `..` 与前一个普通分量抵消
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spellings_collide() {
        let cwd = std::env::current_dir().unwrap();
        let a = ResourceId::from_path("assets/cube.obj").unwrap();
        let b = ResourceId::from_path("./assets/../assets/./cube.obj").unwrap();
        let c = ResourceId::from_path(cwd.join("assets").join("cube.obj")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(Path::new(a.as_str()).is_absolute());
    }

    #[test]
    fn test_named_id_is_verbatim() {
        let id = ResourceId::named("default_cube");
        assert_eq!(id.as_str(), "default_cube");
        assert_eq!(id.to_string(), "default_cube");
    }
}
