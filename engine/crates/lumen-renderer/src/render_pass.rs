use ash::vk;
use lumen_render_interface::frame_counter::FrameSlot;
use lumen_rhi::{
    handles::{RhiCommandBufferHandle, RhiImageViewHandle},
    rhi::Rhi,
    swapchain::RhiSwapchainInfo,
};
use lumen_scene::render_scene::RenderScene;

use crate::{error::RenderResult, resource_cache::RenderResourceCache};

/// swapchain 相关的渲染目标，重建 swapchain 后失效
#[derive(Clone, Copy)]
pub struct SwapchainTargets<'a> {
    pub info: RhiSwapchainInfo,
    pub image_views: &'a [RhiImageViewHandle],
}

/// 场景实际绘制的区域
///
/// viewport 的 y 轴翻转：`y = offset + height`，`height = -height`
#[derive(Debug, Clone, Copy)]
pub struct RenderViewport {
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
}

// vk::Viewport 没有实现 PartialEq
impl PartialEq for RenderViewport {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.viewport, &other.viewport);
        a.x == b.x
            && a.y == b.y
            && a.width == b.width
            && a.height == b.height
            && a.min_depth == b.min_depth
            && a.max_depth == b.max_depth
            && self.scissor == other.scissor
    }
}

impl RenderViewport {
    pub fn new(offset: [f32; 2], extent: [f32; 2]) -> Self {
        let [x, y] = offset;
        let [width, height] = extent;
        Self {
            viewport: vk::Viewport {
                x,
                y: y + height,
                width,
                height: -height,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D {
                    x: x.max(0.0) as i32,
                    y: y.max(0.0) as i32,
                },
                extent: vk::Extent2D {
                    width: width.max(0.0) as u32,
                    height: height.max(0.0) as u32,
                },
            },
        }
    }

    /// 覆盖整个 extent
    pub fn full(extent: vk::Extent2D) -> Self {
        Self::new([0.0, 0.0], [extent.width as f32, extent.height as f32])
    }

    /// 左上角，y 轴向下
    #[inline]
    pub fn offset(&self) -> [f32; 2] {
        [self.viewport.x, self.viewport.y + self.viewport.height]
    }

    #[inline]
    pub fn extent(&self) -> [f32; 2] {
        [self.viewport.width, -self.viewport.height]
    }
}

/// 一个 pass 录制一帧的命令所需的上下文
pub struct PassDrawContext<'a> {
    pub rhi: &'a mut dyn Rhi,
    pub resource_cache: &'a mut RenderResourceCache,
    pub scene: &'a RenderScene,
    pub targets: SwapchainTargets<'a>,
    pub viewport: RenderViewport,
    pub cmd: RhiCommandBufferHandle,
    pub frame_slot: FrameSlot,
    /// 本帧 acquire 到的 swapchain image
    pub image_index: u32,
}

/// 所有 pass 的统一接口
///
/// 每个 pass 持有自己的 render pass、framebuffer、pipeline 与 descriptor set，
/// 在 [`RenderPass::destroy`] 中释放。
pub trait RenderPass {
    fn name(&self) -> &str;

    /// 在 ctx.cmd 中录制本帧的命令
    fn draw(&mut self, ctx: &mut PassDrawContext) -> RenderResult<()>;

    /// swapchain 重建之后，重建与 swapchain 尺寸相关的对象
    fn update_after_framebuffer_recreate(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()>;

    /// 可以重复调用
    fn destroy(&mut self, rhi: &mut dyn Rhi);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = RenderViewport::new([10.0, 20.0], [300.0, 200.0]);
        assert_eq!(viewport.viewport.y, 220.0);
        assert_eq!(viewport.viewport.height, -200.0);
        assert_eq!(viewport.offset(), [10.0, 20.0]);
        assert_eq!(viewport.extent(), [300.0, 200.0]);
        assert_eq!(viewport.scissor.extent.width, 300);
    }

    #[test]
    fn test_viewport_equality() {
        let viewport = RenderViewport::new([10.0, 20.0], [300.0, 200.0]);
        assert_eq!(viewport, RenderViewport::new([10.0, 20.0], [300.0, 200.0]));
        assert_ne!(viewport, RenderViewport::new([10.0, 20.0], [300.0, 100.0]));
        assert_eq!(
            RenderViewport::full(vk::Extent2D { width: 64, height: 32 }),
            RenderViewport::new([0.0, 0.0], [64.0, 32.0])
        );
    }
}
