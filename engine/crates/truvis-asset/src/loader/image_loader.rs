use std::path::Path;

use anyhow::Context;

use crate::texture::TextureData;

/// 通过 `image` 解码，统一转换为 RGBA8
pub fn load_image(path: &Path) -> anyhow::Result<TextureData> {
    let image = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    anyhow::ensure!(width > 0 && height > 0, "image {} is empty", path.display());

    Ok(TextureData {
        name: path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
        pixels: rgba.into_raw(),
        width,
        height,
        channels: 4,
    })
}
