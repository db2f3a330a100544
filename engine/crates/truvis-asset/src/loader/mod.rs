//! 文件格式解码
//!
//! 解码器是资源缓存的外部协作者：给定路径，返回 CPU 端数据或者 `anyhow::Error`。
//! 缓存负责把错误归类为 [`crate::error::AssetError`]。

mod image_loader;
mod obj;
mod stl;

use std::path::Path;

use crate::mesh::MeshData;
use crate::texture::TextureData;

pub use image_loader::load_image;
pub use obj::load_obj;
pub use stl::load_stl;

/// 将文件解码为若干个子网格
pub trait MeshDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<Vec<MeshData>>;
}

/// 将文件解码为 RGBA8 像素
pub trait TextureDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<TextureData>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Obj,
    Stl,
    Unknown,
}

impl ModelFormat {
    pub fn detect(path: &Path) -> Self {
        match extension_lowercase(path).as_deref() {
            Some("obj") => Self::Obj,
            Some("stl") => Self::Stl,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Png,
    Jpg,
    Pnm,
    Hdr,
    Unknown,
}

impl TextureFormat {
    pub fn detect(path: &Path) -> Self {
        match extension_lowercase(path).as_deref() {
            Some("png") => Self::Png,
            Some("jpg" | "jpeg") => Self::Jpg,
            Some("pnm" | "pbm" | "pgm" | "ppm") => Self::Pnm,
            Some("hdr") => Self::Hdr,
            _ => Self::Unknown,
        }
    }
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// 按扩展名分发的内置网格解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinMeshDecoder;

impl MeshDecoder for BuiltinMeshDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<Vec<MeshData>> {
        let _span = tracy_client::span!("BuiltinMeshDecoder::decode");
        match ModelFormat::detect(path) {
            ModelFormat::Obj => load_obj(path),
            ModelFormat::Stl => Ok(vec![load_stl(path)?]),
            ModelFormat::Unknown => anyhow::bail!("unsupported model format: {}", path.display()),
        }
    }
}

/// 基于 `image` 的内置纹理解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTextureDecoder;

impl TextureDecoder for BuiltinTextureDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<TextureData> {
        let _span = tracy_client::span!("BuiltinTextureDecoder::decode");
        match TextureFormat::detect(path) {
            TextureFormat::Unknown => anyhow::bail!("unsupported texture format: {}", path.display()),
            _ => load_image(path),
        }
    }
}
