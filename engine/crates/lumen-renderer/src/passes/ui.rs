use lumen_rhi::{
    error::RhiResult,
    handles::{RhiCommandBufferHandle, RhiRenderPassHandle},
    rhi::Rhi,
};

use crate::render_pass::RenderViewport;

/// 编辑器 UI 的绘制，由外部提供
///
/// 在主相机 pass 的 UI subpass 中录制命令，此时 render pass 已经开始。
pub trait UiOverlay: Send {
    fn name(&self) -> &str;

    /// 主相机 pass 创建之后调用一次，UI 的 pipeline 需要在这个 subpass 上创建
    fn initialize(&mut self, rhi: &mut dyn Rhi, render_pass: RhiRenderPassHandle, subpass: u32) -> RhiResult<()>;

    /// swapchain 格式变化导致 render pass 重建之后调用，此时设备已经空闲
    fn on_render_pass_recreated(
        &mut self,
        rhi: &mut dyn Rhi,
        render_pass: RhiRenderPassHandle,
        subpass: u32,
    ) -> RhiResult<()> {
        self.destroy(rhi);
        self.initialize(rhi, render_pass, subpass)
    }

    fn draw(&mut self, rhi: &mut dyn Rhi, cmd: RhiCommandBufferHandle, viewport: &RenderViewport);

    fn destroy(&mut self, rhi: &mut dyn Rhi);
}
