use ash::vk;
use glam::{Mat4, Vec3};
use lumen_asset::mesh_data::MeshVertex;
use lumen_render_interface::per_frame_data::{MeshPickPerframeStorageBufferObject, VulkanPickMeshInstance};
use lumen_rhi::{
    desc::{
        RhiAttachmentDesc, RhiBufferDesc, RhiBufferImageCopy, RhiClearValue, RhiFramebufferDesc, RhiPipelineDesc,
        RhiRenderPassBeginInfo, RhiRenderPassDesc, RhiSubpassDesc, RhiVertexLayout,
    },
    handles::{RhiBufferHandle, RhiFramebufferHandle, RhiPipelineHandle, RhiRenderPassHandle},
    headless::{HeadlessDrawInput, HeadlessProgram, HeadlessRhi},
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    label_color::LabelColor,
    passes::{
        PassAttachment,
        mesh_batch::{MeshDrawPushConstants, MeshDrawState, MeshInstanceKind, draw_mesh_nodes},
    },
    render_pass::{PassDrawContext, RenderPass, RenderViewport, SwapchainTargets},
    resource_cache::{RenderResourceCache, descriptor_layouts::MeshDescriptorLayouts, per_frame::PER_FRAME_BLOCK_RANGE},
};

/// 把 instance id 写入与 swapchain 同尺寸的 R32_UINT 目标，按需回读单个像素
///
/// 不参与每帧的绘制，由查询方在 single-time command 中调用 `draw`
#[derive(Default)]
pub struct PickPass {
    extent: vk::Extent2D,
    render_pass: RhiRenderPassHandle,
    id_target: PassAttachment,
    depth: PassAttachment,
    framebuffer: RhiFramebufferHandle,
    pipeline: RhiPipelineHandle,
    readback_buffer: RhiBufferHandle,
    /// 下一次 `draw` 回读的像素
    pick_pixel: Option<(u32, u32)>,
    destroyed: bool,
}

// new & init
impl PickPass {
    pub const ID_FORMAT: vk::Format = vk::Format::R32_UINT;
    pub const FRAGMENT_SHADER: &'static str = "mesh_inefficient_pick.frag";

    /// headless 后端没有着色器，需要注册 CPU 上的实现才能写入 instance id
    pub fn register_headless_program(rhi: &mut HeadlessRhi) {
        rhi.register_program(Self::FRAGMENT_SHADER, Box::new(PickIdProgram));
    }

    pub fn new(
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<Self> {
        let _span = tracy_client::span!("PickPass::new");
        let mut pass = Self::default();
        if let Err(e) = pass.init(rhi, resource_cache, targets) {
            pass.destroy(rhi);
            return Err(e);
        }
        Ok(pass)
    }

    fn init(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        let depth_format = targets.info.depth_format;
        self.render_pass = rhi.create_render_pass(
            &RhiRenderPassDesc {
                attachments: vec![
                    RhiAttachmentDesc::clear_store(Self::ID_FORMAT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                    RhiAttachmentDesc::transient(depth_format, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                ],
                subpasses: vec![RhiSubpassDesc {
                    name: "pick",
                    input_attachments: vec![],
                    color_attachments: vec![0],
                    depth_attachment: Some(1),
                }],
                dependencies: vec![],
            },
            "pick",
        )?;

        let layouts = resource_cache.layouts();
        self.pipeline = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("mesh_inefficient_pick.vert", self.render_pass, 0)
                .fragment(Self::FRAGMENT_SHADER)
                .vertex_layout(RhiVertexLayout::Mesh)
                .layouts(&[layouts.per_frame, layouts.per_mesh])
                .color_attachments(1)
                .depth(true, true)
                .cull(vk::CullModeFlags::BACK)
                .push_constants(size_of::<MeshDrawPushConstants>() as u32),
            "pick",
        )?;
        self.readback_buffer =
            rhi.create_buffer(&RhiBufferDesc::new_readback_buffer(size_of::<u32>() as u64), "pick-readback")?;

        self.create_targets(rhi, targets.info.extent, depth_format)?;
        Ok(())
    }

    fn create_targets(&mut self, rhi: &mut dyn Rhi, extent: vk::Extent2D, depth_format: vk::Format) -> RenderResult<()> {
        self.extent = extent;
        self.id_target = PassAttachment::new(
            rhi,
            extent,
            Self::ID_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            1,
            "pick-id",
        )?;
        self.depth = PassAttachment::new(
            rhi,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            1,
            "pick-depth",
        )?;
        self.framebuffer = rhi.create_framebuffer(
            &RhiFramebufferDesc {
                render_pass: self.render_pass,
                attachments: vec![self.id_target.view, self.depth.view],
                extent,
                layers: 1,
            },
            "pick",
        )?;
        log::info!("pick targets created: {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn destroy_targets(&mut self, rhi: &mut dyn Rhi) {
        rhi.destroy_framebuffer(std::mem::take(&mut self.framebuffer));
        self.id_target.destroy(rhi);
        self.depth.destroy(rhi);
    }
}

// getters
impl PickPass {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// tools
impl PickPass {
    /// uv 相对于引擎内容视口，超出渲染目标时返回 None
    pub fn pixel_of(viewport: &RenderViewport, extent: vk::Extent2D, uv: [f32; 2]) -> Option<(u32, u32)> {
        let [offset_x, offset_y] = viewport.offset();
        let [width, height] = viewport.extent();
        let x = (uv[0] * width + offset_x).floor();
        let y = (uv[1] * height + offset_y).floor();
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as u32, y as u32);
        if x >= extent.width || y >= extent.height {
            return None;
        }
        Some((x, y))
    }

    #[inline]
    pub fn set_pick_pixel(&mut self, pixel: (u32, u32)) {
        self.pick_pixel = Some(pixel);
    }

    /// 在 `draw` 所在的 command buffer 执行完成之后调用
    pub fn read_picked_id(&mut self, rhi: &mut dyn Rhi) -> RenderResult<u32> {
        let mut bytes = [0u8; 4];
        rhi.read_buffer(self.readback_buffer, 0, &mut bytes)?;
        self.pick_pixel = None;
        Ok(u32::from_le_bytes(bytes))
    }
}

impl RenderPass for PickPass {
    fn name(&self) -> &str {
        "pick"
    }

    fn draw(&mut self, ctx: &mut PassDrawContext) -> RenderResult<()> {
        let _span = tracy_client::span!("PickPass::draw");
        if self.destroyed {
            return Err(RenderError::PassState("pick pass is destroyed".to_string()));
        }
        let Some((x, y)) = self.pick_pixel else {
            return Err(RenderError::PassState("pick pixel is not set".to_string()));
        };

        let per_frame = ctx.resource_cache.per_frame_data.pick;
        let per_frame_offset = ctx.resource_cache.push_dynamic(
            ctx.rhi,
            ctx.frame_slot,
            bytemuck::bytes_of(&per_frame),
            PER_FRAME_BLOCK_RANGE,
        )?;

        ctx.rhi.cmd_begin_label(ctx.cmd, "[pick-pass]draw", LabelColor::COLOR_PASS);
        ctx.rhi.cmd_begin_render_pass(
            ctx.cmd,
            &RhiRenderPassBeginInfo {
                render_pass: self.render_pass,
                framebuffer: self.framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: self.extent,
                },
                // 0 表示没有物体
                clear_values: vec![
                    RhiClearValue::ColorUint([0; 4]),
                    RhiClearValue::DepthStencil { depth: 1.0, stencil: 0 },
                ],
            },
        );

        ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipeline);
        ctx.rhi.cmd_set_viewport(ctx.cmd, ctx.viewport.viewport);
        ctx.rhi.cmd_set_scissor(ctx.cmd, ctx.viewport.scissor);

        let scene = ctx.scene;
        let draw_count = draw_mesh_nodes(
            ctx,
            &MeshDrawState {
                pipeline: self.pipeline,
                per_frame_offset,
                with_material: false,
                instance_kind: MeshInstanceKind::Pick,
                extra_sets: vec![],
            },
            scene.main_camera_visible_nodes(),
        );
        ctx.rhi.cmd_end_render_pass(ctx.cmd);

        if draw_count.is_ok() {
            ctx.rhi.cmd_copy_image_to_buffer(
                ctx.cmd,
                self.id_target.image,
                self.readback_buffer,
                &[RhiBufferImageCopy::single_texel(x as i32, y as i32)],
            );
        }
        ctx.rhi.cmd_end_label(ctx.cmd);
        draw_count.map(|_| ())
    }

    fn update_after_framebuffer_recreate(
        &mut self,
        rhi: &mut dyn Rhi,
        _resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        let _span = tracy_client::span!("PickPass::update_after_framebuffer_recreate");
        if self.destroyed {
            return Err(RenderError::PassState("pick pass is destroyed".to_string()));
        }
        // 调用方已经等待设备空闲，旧的目标可以直接销毁
        self.destroy_targets(rhi);
        self.create_targets(rhi, targets.info.extent, targets.info.depth_format)
    }

    fn destroy(&mut self, rhi: &mut dyn Rhi) {
        self.destroy_targets(rhi);
        rhi.destroy_buffer(std::mem::take(&mut self.readback_buffer));
        rhi.destroy_pipeline(std::mem::take(&mut self.pipeline));
        rhi.destroy_render_pass(std::mem::take(&mut self.render_pass));
        self.pick_pixel = None;
        self.destroyed = true;
    }
}

/// 拾取着色器在 CPU 上的实现：顶点经过 model 与 proj_view 变换，片元输出 node id
///
/// 忽略蒙皮，使用 model 矩阵变换原始顶点
struct PickIdProgram;
impl PickIdProgram {
    fn read<T: bytemuck::Pod>(bytes: &[u8], index: usize) -> Option<T> {
        let size = size_of::<T>();
        bytes.get(index * size..(index + 1) * size).map(bytemuck::pod_read_unaligned)
    }

    fn instance(input: &HeadlessDrawInput, instance: u32) -> Option<VulkanPickMeshInstance> {
        let instances = input.buffer(0, MeshDescriptorLayouts::PER_FRAME_BINDING_INSTANCES)?;
        Self::read(instances, instance as usize)
    }
}
impl HeadlessProgram for PickIdProgram {
    fn vertex(&self, input: &HeadlessDrawInput, instance: u32, vertex: u32) -> Option<[f32; 4]> {
        let per_frame: MeshPickPerframeStorageBufferObject =
            Self::read(input.buffer(0, MeshDescriptorLayouts::PER_FRAME_BINDING_FRAME_DATA)?, 0)?;
        let model_matrix = Self::instance(input, instance)?.model_matrix;
        let vertex: MeshVertex = Self::read(input.vertex_data, vertex as usize)?;
        let clip: Mat4 = per_frame.proj_view_matrix * model_matrix;
        Some((clip * Vec3::from_array(vertex.position).extend(1.0)).to_array())
    }

    fn fragment(&self, input: &HeadlessDrawInput, instance: u32) -> Option<Vec<u8>> {
        let node_id = Self::instance(input, instance)?.node_id;
        Some(node_id.to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_pixel_of_full_viewport() {
        let viewport = RenderViewport::full(extent(100, 50));
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [0.0, 0.0]), Some((0, 0)));
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [0.5, 0.5]), Some((50, 25)));
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [1.0, 0.5]), None);
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [-0.1, 0.5]), None);
    }

    #[test]
    fn test_pixel_of_offset_viewport() {
        let viewport = RenderViewport::new([20.0, 10.0], [40.0, 20.0]);
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [0.5, 0.5]), Some((40, 20)));
        // 视口之外但仍在渲染目标之内
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [1.5, 0.0]), Some((80, 10)));
        assert_eq!(PickPass::pixel_of(&viewport, extent(100, 50), [2.1, 0.0]), None);
    }
}
