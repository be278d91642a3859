use ash::vk;

/// CPU 端的贴图数据，多层贴图的像素按层依次排列
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub array_layers: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn new_rgba8(width: u32, height: u32, srgb: bool, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: if srgb { vk::Format::R8G8B8A8_SRGB } else { vk::Format::R8G8B8A8_UNORM },
            array_layers: 1,
            pixels,
        }
    }

    pub fn new_rgba32f(width: u32, height: u32, texels: &[f32]) -> Self {
        Self {
            width,
            height,
            format: vk::Format::R32G32B32A32_SFLOAT,
            array_layers: 1,
            pixels: bytemuck::cast_slice(texels).to_vec(),
        }
    }

    /// 缺失贴图时使用的 1x1 贴图
    pub fn single_texel(color: [u8; 4], srgb: bool) -> Self {
        Self::new_rgba8(1, 1, srgb, color.to_vec())
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn texel_size(&self) -> usize {
        match self.format {
            vk::Format::R32G32B32A32_SFLOAT => 16,
            _ => 4,
        }
    }

    #[inline]
    pub fn layer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.texel_size()
    }

    /// 像素数量与尺寸是否一致
    pub fn is_consistent(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.layer_size() * self.array_layers as usize
    }

    /// mip 层数：floor(log2(max(w, h))) + 1
    pub fn full_mip_levels(&self) -> u32 {
        self.width.max(self.height).max(1).ilog2() + 1
    }
}

/// 将 6 张同尺寸、同格式的贴图合并为一个 cube 贴图数据
///
/// 任意一张尺寸或格式不一致时返回 None
pub fn combine_cube_faces(faces: [TextureData; 6]) -> Option<TextureData> {
    let first = &faces[0];
    let (width, height, format) = (first.width, first.height, first.format);
    if faces.iter().any(|f| f.width != width || f.height != height || f.format != format || f.array_layers != 1) {
        return None;
    }

    let mut pixels = Vec::with_capacity(first.pixels.len() * 6);
    for face in &faces {
        pixels.extend_from_slice(&face.pixels);
    }
    Some(TextureData {
        width,
        height,
        format,
        array_layers: 6,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_texel() {
        let tex = TextureData::single_texel([255, 0, 0, 255], true);
        assert_eq!(tex.format, vk::Format::R8G8B8A8_SRGB);
        assert!(tex.is_consistent());
        assert_eq!(tex.full_mip_levels(), 1);
    }

    #[test]
    fn test_mip_levels() {
        let tex = TextureData::new_rgba8(512, 300, false, vec![0; 512 * 300 * 4]);
        assert_eq!(tex.full_mip_levels(), 10);
    }

    #[test]
    fn test_combine_cube_faces() {
        let face = |v: f32| TextureData::new_rgba32f(2, 2, &[v; 16]);
        let cube = combine_cube_faces([face(0.0), face(1.0), face(2.0), face(3.0), face(4.0), face(5.0)]).unwrap();
        assert_eq!(cube.array_layers, 6);
        assert!(cube.is_consistent());
        let layer2 = &cube.pixels[cube.layer_size() * 2..cube.layer_size() * 3];
        assert!(layer2.chunks_exact(4).all(|c| c == 2.0f32.to_ne_bytes()));
    }

    #[test]
    fn test_combine_rejects_mismatched_faces() {
        let small = TextureData::single_texel([0; 4], false);
        let big = TextureData::new_rgba8(2, 2, false, vec![0; 16]);
        let faces = [big.clone(), big.clone(), big.clone(), big.clone(), big, small];
        assert!(combine_cube_faces(faces).is_none());
    }
}
