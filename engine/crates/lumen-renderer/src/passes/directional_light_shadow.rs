use ash::vk;
use lumen_rhi::{
    desc::{
        RhiAttachmentDesc, RhiClearValue, RhiFramebufferDesc, RhiPipelineDesc, RhiRenderPassBeginInfo,
        RhiRenderPassDesc, RhiSubpassDesc, RhiVertexLayout,
    },
    handles::{RhiFramebufferHandle, RhiImageViewHandle, RhiPipelineHandle, RhiRenderPassHandle},
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
    resource_cache::{RenderResourceCache, per_frame::PER_FRAME_BLOCK_RANGE},
};

/// 方向光的阴影贴图：R32_SFLOAT 保存深度，供主相机的光照采样
#[derive(Default)]
pub struct DirectionalLightShadowPass {
    extent: vk::Extent2D,
    render_pass: RhiRenderPassHandle,
    shadow_map: PassAttachment,
    depth: PassAttachment,
    framebuffer: RhiFramebufferHandle,
    pipeline: RhiPipelineHandle,
    destroyed: bool,
}

// new & init
impl DirectionalLightShadowPass {
    pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

    pub fn new(rhi: &mut dyn Rhi, resource_cache: &RenderResourceCache, dimension: u32) -> RenderResult<Self> {
        let _span = tracy_client::span!("DirectionalLightShadowPass::new");
        let mut pass = Self {
            extent: vk::Extent2D {
                width: dimension,
                height: dimension,
            },
            ..Default::default()
        };
        if let Err(e) = pass.init(rhi, resource_cache) {
            pass.destroy(rhi);
            return Err(e);
        }
        Ok(pass)
    }

    fn init(&mut self, rhi: &mut dyn Rhi, resource_cache: &RenderResourceCache) -> RenderResult<()> {
        let depth_format = rhi.depth_format();
        self.render_pass = rhi.create_render_pass(
            &RhiRenderPassDesc {
                attachments: vec![
                    RhiAttachmentDesc::clear_store(
                        Self::SHADOW_MAP_FORMAT,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ),
                    RhiAttachmentDesc::transient(depth_format, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                ],
                subpasses: vec![RhiSubpassDesc {
                    name: "directional-light-shadow",
                    input_attachments: vec![],
                    color_attachments: vec![0],
                    depth_attachment: Some(1),
                }],
                dependencies: vec![],
            },
            "directional-light-shadow",
        )?;

        self.shadow_map = PassAttachment::new(
            rhi,
            self.extent,
            Self::SHADOW_MAP_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            1,
            "directional-light-shadow-map",
        )?;
        self.depth = PassAttachment::new(
            rhi,
            self.extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            1,
            "directional-light-shadow-depth",
        )?;
        self.framebuffer = rhi.create_framebuffer(
            &RhiFramebufferDesc {
                render_pass: self.render_pass,
                attachments: vec![self.shadow_map.view, self.depth.view],
                extent: self.extent,
                layers: 1,
            },
            "directional-light-shadow",
        )?;

        let layouts = resource_cache.layouts();
        self.pipeline = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("mesh_directional_light_shadow.vert", self.render_pass, 0)
                .fragment("mesh_directional_light_shadow.frag")
                .vertex_layout(RhiVertexLayout::Mesh)
                .layouts(&[layouts.per_frame, layouts.per_mesh])
                .color_attachments(1)
                .depth(true, true)
                .cull(vk::CullModeFlags::BACK)
                .push_constants(size_of::<MeshDrawPushConstants>() as u32),
            "directional-light-shadow",
        )?;
        log::info!("directional light shadow pass created: {}x{}", self.extent.width, self.extent.height);
        Ok(())
    }
}

// getters
impl DirectionalLightShadowPass {
    #[inline]
    pub fn shadow_map_view(&self) -> RhiImageViewHandle {
        self.shadow_map.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl RenderPass for DirectionalLightShadowPass {
    fn name(&self) -> &str {
        "directional-light-shadow"
    }

    fn draw(&mut self, ctx: &mut PassDrawContext) -> RenderResult<()> {
        let _span = tracy_client::span!("DirectionalLightShadowPass::draw");
        if self.destroyed {
            return Err(RenderError::PassState("directional light shadow pass is destroyed".to_string()));
        }

        let per_frame = ctx.resource_cache.per_frame_data.directional_light_shadow;
        let per_frame_offset = ctx.resource_cache.push_dynamic(
            ctx.rhi,
            ctx.frame_slot,
            bytemuck::bytes_of(&per_frame),
            PER_FRAME_BLOCK_RANGE,
        )?;

        ctx.rhi.cmd_begin_label(ctx.cmd, "[directional-light-shadow-pass]draw", LabelColor::COLOR_PASS);
        ctx.rhi.cmd_begin_render_pass(
            ctx.cmd,
            &RhiRenderPassBeginInfo {
                render_pass: self.render_pass,
                framebuffer: self.framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: self.extent,
                },
                clear_values: vec![
                    RhiClearValue::Color([1.0, 0.0, 0.0, 0.0]),
                    RhiClearValue::DepthStencil { depth: 1.0, stencil: 0 },
                ],
            },
        );

        ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipeline);
        let viewport = RenderViewport::full(self.extent);
        ctx.rhi.cmd_set_viewport(ctx.cmd, viewport.viewport);
        ctx.rhi.cmd_set_scissor(ctx.cmd, viewport.scissor);

        let scene = ctx.scene;
        let draw_count = draw_mesh_nodes(
            ctx,
            &MeshDrawState {
                pipeline: self.pipeline,
                per_frame_offset,
                with_material: false,
                instance_kind: MeshInstanceKind::Mesh,
                extra_sets: vec![],
            },
            scene.directional_light_visible_nodes(),
        );

        // 出错时也要保持 render pass 与 label 成对
        ctx.rhi.cmd_end_render_pass(ctx.cmd);
        ctx.rhi.cmd_end_label(ctx.cmd);
        draw_count.map(|_| ())
    }

    fn update_after_framebuffer_recreate(
        &mut self,
        _rhi: &mut dyn Rhi,
        _resource_cache: &RenderResourceCache,
        _targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        // 阴影贴图的尺寸与 swapchain 无关
        Ok(())
    }

    fn destroy(&mut self, rhi: &mut dyn Rhi) {
        rhi.destroy_pipeline(std::mem::take(&mut self.pipeline));
        rhi.destroy_framebuffer(std::mem::take(&mut self.framebuffer));
        self.shadow_map.destroy(rhi);
        self.depth.destroy(rhi);
        rhi.destroy_render_pass(std::mem::take(&mut self.render_pass));
        self.destroyed = true;
    }
}
