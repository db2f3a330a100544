/// CPU 端的纹理数据，像素统一为 RGBA8
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureData {
    pub name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 每个像素的通道数，目前总是 4
    pub channels: u32,
}

// getters
impl TextureData {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.data_size()
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// 完整 mip 链的层数
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.width.max(self.height).max(1).ilog2() + 1
    }
}

// 程序化纹理
impl TextureData {
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            name: "SolidColor".to_string(),
            pixels: color.repeat(width as usize * height as usize),
            width,
            height,
            channels: 4,
        }
    }

    /// 以 `square_size` 为边长交替填充两种颜色，左上角为 `color1`
    pub fn checkerboard(width: u32, height: u32, square_size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let square_size = square_size.max(1);
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let first = (x / square_size + y / square_size) % 2 == 0;
                pixels.extend_from_slice(if first { &color1 } else { &color2 });
            }
        }
        Self {
            name: "Checkerboard".to_string(),
            pixels,
            width,
            height,
            channels: 4,
        }
    }
}
