//! 在 CPU 上执行的着色器
//!
//! headless 后端默认只对 draw 计数。按 fragment shader 的名字注册 [`HeadlessProgram`] 之后，
//! 使用该 shader 的 draw 会被光栅化：program 计算顶点的裁剪空间坐标以及片元输出，
//! 后端负责视口变换、三角形覆盖、深度测试，以及写入 subpass 的第一个 color attachment。
//!
//! 不做剔除，也不做近平面裁剪：任意顶点的 w 不为正的三角形被整体丢弃。

use ash::vk;

/// draw 时可以读取的数据
pub struct HeadlessDrawInput<'a> {
    /// 绑定在 binding 0 上的顶点 buffer，从绑定的 offset 开始
    pub vertex_data: &'a [u8],
    pub instance_count: u32,
    /// (set, binding) 处的 buffer 内容，已经加上 descriptor 的 offset 与 dynamic offset
    pub(super) buffers: Vec<((u32, u32), &'a [u8])>,
}
impl<'a> HeadlessDrawInput<'a> {
    pub fn buffer(&self, set: u32, binding: u32) -> Option<&'a [u8]> {
        self.buffers.iter().find(|(key, _)| *key == (set, binding)).map(|(_, bytes)| *bytes)
    }
}

pub trait HeadlessProgram: Send {
    /// 顶点着色，返回裁剪空间坐标；返回 None 时丢弃包含该顶点的三角形
    fn vertex(&self, input: &HeadlessDrawInput, instance: u32, vertex: u32) -> Option<[f32; 4]>;

    /// 片元着色，返回写入 color attachment 的 texel，长度需要与 attachment 的 texel 大小一致
    fn fragment(&self, input: &HeadlessDrawInput, instance: u32) -> Option<Vec<u8>>;
}

/// 光栅化的目标区域
#[derive(Debug, Clone, Copy)]
pub(super) struct RasterTarget {
    pub viewport: vk::Viewport,
    /// render area 与 scissor 的交集
    pub clip: vk::Rect2D,
}

/// 覆盖的像素：(x, y, depth)
pub(super) fn rasterize_triangle(target: &RasterTarget, clip_positions: [[f32; 4]; 3], mut emit: impl FnMut(u32, u32, f32)) {
    if clip_positions.iter().any(|p| p[3] <= f32::EPSILON) {
        return;
    }
    let vp = target.viewport;
    let screen = clip_positions.map(|[x, y, z, w]| {
        let (x, y, z) = (x / w, y / w, z / w);
        [
            vp.x + (x + 1.0) * 0.5 * vp.width,
            vp.y + (y + 1.0) * 0.5 * vp.height,
            vp.min_depth + z * (vp.max_depth - vp.min_depth),
        ]
    });

    let edge = |a: [f32; 3], b: [f32; 3], px: f32, py: f32| (b[0] - a[0]) * (py - a[1]) - (b[1] - a[1]) * (px - a[0]);
    let area = edge(screen[0], screen[1], screen[2][0], screen[2][1]);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = screen.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).floor().max(target.clip.offset.x as f32);
    let min_y = screen.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).floor().max(target.clip.offset.y as f32);
    let max_x = screen
        .iter()
        .map(|p| p[0])
        .fold(f32::NEG_INFINITY, f32::max)
        .ceil()
        .min((target.clip.offset.x + target.clip.extent.width as i32) as f32);
    let max_y = screen
        .iter()
        .map(|p| p[1])
        .fold(f32::NEG_INFINITY, f32::max)
        .ceil()
        .min((target.clip.offset.y + target.clip.extent.height as i32) as f32);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    for y in min_y as u32..max_y as u32 {
        for x in min_x as u32..max_x as u32 {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(screen[1], screen[2], px, py) / area;
            let w1 = edge(screen[2], screen[0], px, py) / area;
            let w2 = edge(screen[0], screen[1], px, py) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let depth = w0 * screen[0][2] + w1 * screen[1][2] + w2 * screen[2][2];
            if (0.0..=1.0).contains(&depth) {
                emit(x, y, depth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(width: u32, height: u32) -> RasterTarget {
        RasterTarget {
            viewport: vk::Viewport {
                x: 0.0,
                y: height as f32,
                width: width as f32,
                height: -(height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            },
            clip: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D { width, height },
            },
        }
    }

    fn covered(target: &RasterTarget, triangle: [[f32; 4]; 3]) -> Vec<(u32, u32, f32)> {
        let mut pixels = Vec::new();
        rasterize_triangle(target, triangle, |x, y, depth| pixels.push((x, y, depth)));
        pixels
    }

    #[test]
    fn test_full_screen_quad_covers_every_pixel_once() {
        let target = target(8, 4);
        let a = [-1.0, -1.0, 0.5, 1.0];
        let b = [1.0, -1.0, 0.5, 1.0];
        let c = [1.0, 1.0, 0.5, 1.0];
        let d = [-1.0, 1.0, 0.5, 1.0];

        let mut pixels = covered(&target, [a, b, c]);
        // 另一种绕序同样会被光栅化
        pixels.extend(covered(&target, [a, d, c]));
        pixels.sort_by_key(|(x, y, _)| (*y, *x));
        pixels.dedup_by_key(|(x, y, _)| (*x, *y));
        assert_eq!(pixels.len(), 32);
        assert!(pixels.iter().all(|(_, _, depth)| (*depth - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_triangle_behind_camera_is_dropped() {
        let target = target(8, 8);
        let triangle = [[-1.0, -1.0, 0.5, 1.0], [1.0, -1.0, 0.5, -1.0], [0.0, 1.0, 0.5, 1.0]];
        assert!(covered(&target, triangle).is_empty());
    }

    #[test]
    fn test_upper_half_in_ndc_lands_on_top_rows() {
        // 视口的高度为负，ndc 的 +y 对应图像的上方
        let target = target(4, 4);
        let triangle = [[-1.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0], [-1.0, 1.0, 0.0, 1.0]];
        let pixels = covered(&target, triangle);
        assert!(!pixels.is_empty());
        assert!(pixels.iter().all(|(_, y, _)| *y < 2));
    }
}
