use ash::vk;
use lumen_render_interface::{
    frame_counter::FrameSlot, per_frame_data::AxisStorageBufferObject, render_settings::RenderPipelineType,
};
use lumen_rhi::{
    desc::{
        RhiAttachmentDesc, RhiClearValue, RhiDescriptorBinding, RhiDescriptorWrite, RhiFramebufferDesc,
        RhiPipelineDesc, RhiRenderPassBeginInfo, RhiRenderPassDesc, RhiSamplerDesc, RhiSubpassDependency,
        RhiSubpassDesc, RhiVertexLayout,
    },
    handles::{
        RhiDescriptorPoolHandle, RhiDescriptorSetHandle, RhiDescriptorSetLayoutHandle, RhiFramebufferHandle,
        RhiImageViewHandle, RhiPipelineHandle, RhiRenderPassHandle, RhiSamplerHandle,
    },
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    label_color::LabelColor,
    passes::{
        PassAttachment,
        mesh_batch::{MeshDrawPushConstants, MeshDrawState, MeshInstanceKind, draw_mesh_nodes},
        ui::UiOverlay,
    },
    render_pass::{PassDrawContext, RenderPass, SwapchainTargets},
    resource_cache::{
        RenderResourceCache,
        per_frame::{INSTANCE_BLOCK_RANGE, PER_FRAME_BLOCK_RANGE},
    },
};

/// 主相机 pass 的 attachment 下标
pub struct MainCameraAttachment;
impl MainCameraAttachment {
    pub const GBUFFER_A: u32 = 0;
    pub const GBUFFER_B: u32 = 1;
    pub const GBUFFER_C: u32 = 2;
    pub const BACKUP_ODD: u32 = 3;
    pub const BACKUP_EVEN: u32 = 4;
    pub const POST_PROCESS_ODD: u32 = 5;
    pub const POST_PROCESS_EVEN: u32 = 6;
    pub const DEPTH: u32 = 7;
    pub const SWAPCHAIN_IMAGE: u32 = 8;

    /// 除 swapchain image 之外，由 pass 自己创建的 attachment 数量
    const OWNED_COUNT: usize = 8;
}

/// 主相机 pass 的 subpass 顺序
pub struct MainCameraSubpass;
impl MainCameraSubpass {
    pub const BASE_PASS: u32 = 0;
    pub const DEFERRED_LIGHTING: u32 = 1;
    pub const FORWARD_LIGHTING: u32 = 2;
    pub const TONE_MAPPING: u32 = 3;
    pub const COLOR_GRADING: u32 = 4;
    pub const FXAA: u32 = 5;
    pub const UI: u32 = 6;
    pub const COMBINE_UI: u32 = 7;

    const COUNT: u32 = 8;
    const NAMES: [&'static str; 8] = [
        "base-pass",
        "deferred-lighting",
        "forward-lighting",
        "tone-mapping",
        "color-grading",
        "fxaa",
        "ui",
        "combine-ui",
    ];
}

pub struct MainCameraPassInitInfo<'a> {
    pub enable_fxaa: bool,
    pub pipeline_type: RenderPipelineType,
    pub directional_light_shadow_map: RhiImageViewHandle,
    pub point_light_shadow_map: RhiImageViewHandle,
    pub targets: SwapchainTargets<'a>,
    pub ui_overlay: Option<Box<dyn UiOverlay>>,
}

#[derive(Default)]
struct MainCameraLayouts {
    gbuffer_input: RhiDescriptorSetLayoutHandle,
    lighting: RhiDescriptorSetLayoutHandle,
    tone_mapping: RhiDescriptorSetLayoutHandle,
    color_grading: RhiDescriptorSetLayoutHandle,
    fxaa: RhiDescriptorSetLayoutHandle,
    combine_ui: RhiDescriptorSetLayoutHandle,
}

#[derive(Default)]
struct MainCameraPipelines {
    gbuffer: RhiPipelineHandle,
    deferred_lighting: RhiPipelineHandle,
    deferred_skybox: RhiPipelineHandle,
    forward_mesh: RhiPipelineHandle,
    forward_skybox: RhiPipelineHandle,
    tone_mapping: RhiPipelineHandle,
    color_grading: RhiPipelineHandle,
    fxaa: RhiPipelineHandle,
    axis: RhiPipelineHandle,
    combine_ui: RhiPipelineHandle,
}

impl MainCameraPipelines {
    fn all(&self) -> [RhiPipelineHandle; 10] {
        [
            self.gbuffer,
            self.deferred_lighting,
            self.deferred_skybox,
            self.forward_mesh,
            self.forward_skybox,
            self.tone_mapping,
            self.color_grading,
            self.fxaa,
            self.axis,
            self.combine_ui,
        ]
    }
}

/// 写入时所用的资源版本，0 表示还没有写入过
#[derive(Debug, Clone, Copy, Default)]
struct VersionedSet {
    set: RhiDescriptorSetHandle,
    version: u64,
}

/// 主相机 pass：延迟/前向着色、后处理与 UI 合成在同一个 render pass 的多个 subpass 中完成
#[derive(Default)]
pub struct MainCameraPass {
    enable_fxaa: bool,
    pipeline_type: RenderPipelineType,

    render_pass: RhiRenderPassHandle,
    extent: vk::Extent2D,
    swapchain_format: vk::Format,
    /// 下标与 [`MainCameraAttachment`] 一致
    attachments: Vec<PassAttachment>,
    /// 每个 swapchain image 一个
    framebuffers: Vec<RhiFramebufferHandle>,

    layouts: MainCameraLayouts,
    pipelines: MainCameraPipelines,

    gbuffer_input_set: RhiDescriptorSetHandle,
    tone_mapping_set: RhiDescriptorSetHandle,
    fxaa_set: RhiDescriptorSetHandle,
    combine_ui_set: RhiDescriptorSetHandle,
    /// 引用全局资源的 set 每个 frame slot 一份，避免改写 in flight 的帧正在使用的 set
    lighting_sets: Vec<VersionedSet>,
    color_grading_sets: Vec<VersionedSet>,

    directional_light_shadow_map: RhiImageViewHandle,
    point_light_shadow_map: RhiImageViewHandle,
    shadow_map_sampler: RhiSamplerHandle,
    post_process_sampler: RhiSamplerHandle,

    axis_visible: bool,
    selected_axis: u32,
    ui_overlay: Option<Box<dyn UiOverlay>>,
    destroyed: bool,
}

// new & init
impl MainCameraPass {
    pub fn new(
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        fif_count: usize,
        init_info: MainCameraPassInitInfo,
    ) -> RenderResult<Self> {
        let _span = tracy_client::span!("MainCameraPass::new");
        let mut pass = Self {
            enable_fxaa: init_info.enable_fxaa,
            pipeline_type: init_info.pipeline_type,
            swapchain_format: init_info.targets.info.image_format,
            directional_light_shadow_map: init_info.directional_light_shadow_map,
            point_light_shadow_map: init_info.point_light_shadow_map,
            selected_axis: AxisStorageBufferObject::default().selected_axis,
            ui_overlay: init_info.ui_overlay,
            ..Default::default()
        };
        if let Err(e) = pass.init(rhi, resource_cache, fif_count, &init_info.targets) {
            pass.destroy(rhi);
            return Err(e);
        }
        Ok(pass)
    }

    fn init(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        fif_count: usize,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        self.render_pass = rhi.create_render_pass(&self.render_pass_desc(targets.info.depth_format), "main-camera")?;
        self.create_layouts(rhi)?;
        self.create_pipelines(rhi, resource_cache)?;
        self.allocate_sets(rhi, resource_cache.descriptor_pool(), fif_count)?;

        self.shadow_map_sampler = rhi.create_sampler(&RhiSamplerDesc::nearest_clamp(), "shadow-map")?;
        self.post_process_sampler = rhi.create_sampler(&RhiSamplerDesc::linear_clamp(), "post-process")?;

        self.create_size_dependent(rhi, targets)?;

        if let Some(ui) = self.ui_overlay.as_mut() {
            ui.initialize(rhi, self.render_pass, MainCameraSubpass::UI)?;
            log::info!("ui overlay <{}> initialized", ui.name());
        }
        log::info!(
            "main camera pass created: {:?}, fxaa {}",
            self.pipeline_type,
            if self.enable_fxaa { "on" } else { "off" }
        );
        Ok(())
    }

    /// 开启 FXAA 时 color grading 写入 post_process_odd，由 FXAA 采样后写回 backup_odd；
    /// 关闭时 color grading 直接写入 backup_odd
    fn render_pass_desc(&self, depth_format: vk::Format) -> RhiRenderPassDesc {
        use MainCameraAttachment as A;

        let hdr = vk::Format::R16G16B16A16_SFLOAT;
        let color_final = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        let attachments = vec![
            RhiAttachmentDesc::transient(vk::Format::A2B10G10R10_UNORM_PACK32, color_final),
            RhiAttachmentDesc::transient(vk::Format::R8G8B8A8_UNORM, color_final),
            RhiAttachmentDesc::transient(vk::Format::R8G8B8A8_SRGB, color_final),
            RhiAttachmentDesc::transient(hdr, color_final),
            RhiAttachmentDesc::transient(hdr, color_final),
            RhiAttachmentDesc::transient(hdr, color_final),
            RhiAttachmentDesc::transient(hdr, color_final),
            RhiAttachmentDesc::transient(depth_format, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            RhiAttachmentDesc::clear_store(self.swapchain_format, vk::ImageLayout::PRESENT_SRC_KHR),
        ];

        let (color_grading_output, fxaa_output) =
            if self.enable_fxaa { (A::POST_PROCESS_ODD, A::BACKUP_ODD) } else { (A::BACKUP_ODD, A::POST_PROCESS_ODD) };
        let subpass = |index: u32, inputs: Vec<u32>, colors: Vec<u32>, depth: Option<u32>| RhiSubpassDesc {
            name: MainCameraSubpass::NAMES[index as usize],
            input_attachments: inputs,
            color_attachments: colors,
            depth_attachment: depth,
        };
        let subpasses = vec![
            subpass(0, vec![], vec![A::GBUFFER_A, A::GBUFFER_B, A::GBUFFER_C], Some(A::DEPTH)),
            subpass(1, vec![A::GBUFFER_A, A::GBUFFER_B, A::GBUFFER_C, A::DEPTH], vec![A::BACKUP_ODD], None),
            subpass(2, vec![], vec![A::BACKUP_ODD], Some(A::DEPTH)),
            subpass(3, vec![A::BACKUP_ODD], vec![A::BACKUP_EVEN], None),
            subpass(4, vec![A::BACKUP_EVEN], vec![color_grading_output], None),
            subpass(5, vec![], vec![fxaa_output], None),
            subpass(6, vec![], vec![A::BACKUP_EVEN], None),
            subpass(7, vec![A::BACKUP_ODD, A::BACKUP_EVEN], vec![A::SWAPCHAIN_IMAGE], None),
        ];
        let dependencies = (0..MainCameraSubpass::COUNT - 1)
            .map(|src| RhiSubpassDependency::color_to_input(src, src + 1))
            .collect();

        RhiRenderPassDesc {
            attachments,
            subpasses,
            dependencies,
        }
    }

    fn create_layouts(&mut self, rhi: &mut dyn Rhi) -> RenderResult<()> {
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let input = |binding: u32| RhiDescriptorBinding::new(binding, vk::DescriptorType::INPUT_ATTACHMENT, fragment);
        let sampled =
            |binding: u32| RhiDescriptorBinding::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, fragment);

        self.layouts.gbuffer_input =
            rhi.create_descriptor_set_layout(&[input(0), input(1), input(2), input(3)], "main-camera-gbuffer-input")?;
        // irradiance, specular, brdf, 方向光阴影, 点光源阴影
        self.layouts.lighting = rhi.create_descriptor_set_layout(
            &[sampled(0), sampled(1), sampled(2), sampled(3), sampled(4)],
            "main-camera-lighting",
        )?;
        self.layouts.tone_mapping = rhi.create_descriptor_set_layout(&[input(0)], "main-camera-tone-mapping")?;
        self.layouts.color_grading =
            rhi.create_descriptor_set_layout(&[input(0), sampled(1)], "main-camera-color-grading")?;
        self.layouts.fxaa = rhi.create_descriptor_set_layout(&[sampled(0)], "main-camera-fxaa")?;
        self.layouts.combine_ui = rhi.create_descriptor_set_layout(&[input(0), input(1)], "main-camera-combine-ui")?;
        Ok(())
    }

    /// 两种着色路径的 pipeline 都在初始化时创建，切换时不需要重建
    fn create_pipelines(&mut self, rhi: &mut dyn Rhi, resource_cache: &RenderResourceCache) -> RenderResult<()> {
        use MainCameraSubpass as S;

        let mesh = resource_cache.layouts();
        let rp = self.render_pass;
        let push_constant_size = size_of::<MeshDrawPushConstants>() as u32;

        self.pipelines.gbuffer = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("mesh.vert", rp, S::BASE_PASS)
                .fragment("mesh_gbuffer.frag")
                .vertex_layout(RhiVertexLayout::Mesh)
                .layouts(&[mesh.per_frame, mesh.per_mesh, mesh.per_material])
                .color_attachments(3)
                .depth(true, true)
                .cull(vk::CullModeFlags::BACK)
                .push_constants(push_constant_size),
            "main-camera-gbuffer",
        )?;
        // 光照着色器跳过深度为 1 的背景像素，保留先绘制的天空盒
        self.pipelines.deferred_skybox = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("skybox.vert", rp, S::DEFERRED_LIGHTING)
                .fragment("skybox.frag")
                .layouts(&[mesh.per_frame, self.layouts.lighting]),
            "main-camera-deferred-skybox",
        )?;
        self.pipelines.deferred_lighting = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("post_process.vert", rp, S::DEFERRED_LIGHTING)
                .fragment("deferred_lighting.frag")
                .layouts(&[mesh.per_frame, self.layouts.gbuffer_input, self.layouts.lighting])
                .blend(true),
            "main-camera-deferred-lighting",
        )?;
        self.pipelines.forward_mesh = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("mesh.vert", rp, S::FORWARD_LIGHTING)
                .fragment("mesh.frag")
                .vertex_layout(RhiVertexLayout::Mesh)
                .layouts(&[mesh.per_frame, mesh.per_mesh, mesh.per_material, self.layouts.lighting])
                .depth(true, true)
                .cull(vk::CullModeFlags::BACK)
                .push_constants(push_constant_size),
            "main-camera-forward-mesh",
        )?;
        self.pipelines.forward_skybox = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("skybox.vert", rp, S::FORWARD_LIGHTING)
                .fragment("skybox.frag")
                .layouts(&[mesh.per_frame, self.layouts.lighting])
                .depth(true, false),
            "main-camera-forward-skybox",
        )?;
        self.pipelines.tone_mapping = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("post_process.vert", rp, S::TONE_MAPPING)
                .fragment("tone_mapping.frag")
                .layouts(&[self.layouts.tone_mapping]),
            "main-camera-tone-mapping",
        )?;
        self.pipelines.color_grading = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("post_process.vert", rp, S::COLOR_GRADING)
                .fragment("color_grading.frag")
                .layouts(&[self.layouts.color_grading]),
            "main-camera-color-grading",
        )?;
        self.pipelines.fxaa = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("fxaa.vert", rp, S::FXAA).fragment("fxaa.frag").layouts(&[self.layouts.fxaa]),
            "main-camera-fxaa",
        )?;
        self.pipelines.axis = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("axis.vert", rp, S::UI)
                .fragment("axis.frag")
                .vertex_layout(RhiVertexLayout::Mesh)
                .layouts(&[mesh.per_frame, mesh.per_mesh])
                .blend(true),
            "main-camera-axis",
        )?;
        self.pipelines.combine_ui = rhi.create_graphics_pipeline(
            &RhiPipelineDesc::new("post_process.vert", rp, S::COMBINE_UI)
                .fragment("combine_ui.frag")
                .layouts(&[self.layouts.combine_ui]),
            "main-camera-combine-ui",
        )?;
        Ok(())
    }

    fn allocate_sets(
        &mut self,
        rhi: &mut dyn Rhi,
        pool: RhiDescriptorPoolHandle,
        fif_count: usize,
    ) -> RenderResult<()> {
        self.gbuffer_input_set = rhi.allocate_descriptor_set(pool, self.layouts.gbuffer_input, "gbuffer-input")?;
        self.tone_mapping_set = rhi.allocate_descriptor_set(pool, self.layouts.tone_mapping, "tone-mapping")?;
        self.fxaa_set = rhi.allocate_descriptor_set(pool, self.layouts.fxaa, "fxaa")?;
        self.combine_ui_set = rhi.allocate_descriptor_set(pool, self.layouts.combine_ui, "combine-ui")?;
        for slot in 0..fif_count {
            let set = rhi.allocate_descriptor_set(pool, self.layouts.lighting, &format!("lighting-{}", slot))?;
            self.lighting_sets.push(VersionedSet { set, version: 0 });
            let set = rhi.allocate_descriptor_set(pool, self.layouts.color_grading, &format!("color-grading-{}", slot))?;
            self.color_grading_sets.push(VersionedSet { set, version: 0 });
        }
        Ok(())
    }

    /// 创建与 swapchain 尺寸相关的 attachment 与 framebuffer，并改写引用它们的 set
    fn create_size_dependent(&mut self, rhi: &mut dyn Rhi, targets: &SwapchainTargets) -> RenderResult<()> {
        let _span = tracy_client::span!("MainCameraPass::create_size_dependent");
        self.extent = targets.info.extent;

        let desc = self.render_pass_desc(targets.info.depth_format);
        let usage_of = |index: usize| -> vk::ImageUsageFlags {
            if index == MainCameraAttachment::DEPTH as usize {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
            }
        };
        for (index, attachment) in desc.attachments.iter().take(MainCameraAttachment::OWNED_COUNT).enumerate() {
            let name = format!("main-camera-attachment-{}", index);
            self.attachments.push(PassAttachment::new(
                rhi,
                self.extent,
                attachment.format,
                usage_of(index),
                1,
                &name,
            )?);
        }

        for (index, swapchain_view) in targets.image_views.iter().enumerate() {
            let mut views = self.attachments.iter().map(|a| a.view).collect::<Vec<_>>();
            views.push(*swapchain_view);
            self.framebuffers.push(rhi.create_framebuffer(
                &RhiFramebufferDesc {
                    render_pass: self.render_pass,
                    attachments: views,
                    extent: self.extent,
                    layers: 1,
                },
                &format!("main-camera-{}", index),
            )?);
        }

        self.write_attachment_sets(rhi)?;
        // color grading 的 set 引用了 attachment，需要在下次绘制时重写
        for set in &mut self.color_grading_sets {
            set.version = 0;
        }
        Ok(())
    }

    fn write_attachment_sets(&mut self, rhi: &mut dyn Rhi) -> RenderResult<()> {
        use MainCameraAttachment as A;
        let view = |index: u32| self.attachments[index as usize].view;

        rhi.update_descriptor_set(
            self.gbuffer_input_set,
            &[
                RhiDescriptorWrite::input_attachment(0, view(A::GBUFFER_A)),
                RhiDescriptorWrite::input_attachment(1, view(A::GBUFFER_B)),
                RhiDescriptorWrite::input_attachment(2, view(A::GBUFFER_C)),
                RhiDescriptorWrite::input_attachment(3, view(A::DEPTH)),
            ],
        )?;
        rhi.update_descriptor_set(
            self.tone_mapping_set,
            &[RhiDescriptorWrite::input_attachment(0, view(A::BACKUP_ODD))],
        )?;
        rhi.update_descriptor_set(
            self.fxaa_set,
            &[RhiDescriptorWrite::sampled_image(0, view(A::POST_PROCESS_ODD), self.post_process_sampler)],
        )?;
        rhi.update_descriptor_set(
            self.combine_ui_set,
            &[
                RhiDescriptorWrite::input_attachment(0, view(A::BACKUP_ODD)),
                RhiDescriptorWrite::input_attachment(1, view(A::BACKUP_EVEN)),
            ],
        )?;
        Ok(())
    }

    /// swapchain 格式变化时，render pass 的最后一个 attachment 以及在其上创建的 pipeline 都需要重建
    fn recreate_format_dependent(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        let _span = tracy_client::span!("MainCameraPass::recreate_format_dependent");
        log::info!(
            "main camera pass: swapchain format changed from {:?} to {:?}, rebuild render pass",
            self.swapchain_format,
            targets.info.image_format
        );
        self.destroy_size_dependent(rhi);
        for pipeline in std::mem::take(&mut self.pipelines).all() {
            rhi.destroy_pipeline(pipeline);
        }
        rhi.destroy_render_pass(std::mem::take(&mut self.render_pass));

        self.swapchain_format = targets.info.image_format;
        self.render_pass = rhi.create_render_pass(&self.render_pass_desc(targets.info.depth_format), "main-camera")?;
        self.create_pipelines(rhi, resource_cache)?;
        if let Some(ui) = self.ui_overlay.as_mut() {
            ui.on_render_pass_recreated(rhi, self.render_pass, MainCameraSubpass::UI)?;
        }
        Ok(())
    }

    fn destroy_size_dependent(&mut self, rhi: &mut dyn Rhi) {
        for framebuffer in self.framebuffers.drain(..) {
            rhi.destroy_framebuffer(framebuffer);
        }
        for mut attachment in self.attachments.drain(..) {
            attachment.destroy(rhi);
        }
    }
}

// getters
impl MainCameraPass {
    #[inline]
    pub fn render_pass(&self) -> RhiRenderPassHandle {
        self.render_pass
    }

    #[inline]
    pub fn pipeline_type(&self) -> RenderPipelineType {
        self.pipeline_type
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

// update
impl MainCameraPass {
    #[inline]
    pub fn set_render_pipeline_type(&mut self, pipeline_type: RenderPipelineType) {
        self.pipeline_type = pipeline_type;
    }

    #[inline]
    pub fn set_axis_visible_state(&mut self, visible: bool) {
        self.axis_visible = visible;
    }

    /// 0/1/2 表示 x/y/z，其余值表示没有选中
    #[inline]
    pub fn set_selected_axis(&mut self, selected_axis: u32) {
        self.selected_axis = selected_axis;
    }

    /// 全局资源替换之后，在这个 slot 第一次绘制时改写 set
    fn prepare_lighting_set(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        slot: FrameSlot,
    ) -> RenderResult<RhiDescriptorSetHandle> {
        let version = resource_cache.global_resource_version();
        let entry = self.lighting_sets[*slot];
        if entry.version == version {
            return Ok(entry.set);
        }
        let global = resource_cache
            .global_resource()
            .ok_or_else(|| RenderError::PassState("global render resource is missing".to_string()))?;
        rhi.update_descriptor_set(
            entry.set,
            &[
                RhiDescriptorWrite::sampled_image(0, global.irradiance.view, global.irradiance_sampler),
                RhiDescriptorWrite::sampled_image(1, global.specular.view, global.specular_sampler),
                RhiDescriptorWrite::sampled_image(2, global.brdf_lut.view, global.brdf_lut_sampler),
                RhiDescriptorWrite::sampled_image(3, self.directional_light_shadow_map, self.shadow_map_sampler),
                RhiDescriptorWrite::sampled_image(4, self.point_light_shadow_map, self.shadow_map_sampler),
            ],
        )?;
        self.lighting_sets[*slot].version = version;
        Ok(entry.set)
    }

    fn prepare_color_grading_set(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        slot: FrameSlot,
    ) -> RenderResult<RhiDescriptorSetHandle> {
        let version = resource_cache.global_resource_version();
        let entry = self.color_grading_sets[*slot];
        if entry.version == version {
            return Ok(entry.set);
        }
        let global = resource_cache
            .global_resource()
            .ok_or_else(|| RenderError::PassState("global render resource is missing".to_string()))?;
        rhi.update_descriptor_set(
            entry.set,
            &[
                RhiDescriptorWrite::input_attachment(
                    0,
                    self.attachments[MainCameraAttachment::BACKUP_EVEN as usize].view,
                ),
                RhiDescriptorWrite::sampled_image(1, global.color_grading_lut.view, global.color_grading_lut_sampler),
            ],
        )?;
        self.color_grading_sets[*slot].version = version;
        Ok(entry.set)
    }
}

// draw
impl MainCameraPass {
    fn record_subpasses(
        &mut self,
        ctx: &mut PassDrawContext,
        per_frame_offset: u32,
        axis_offset: Option<u32>,
        lighting_set: RhiDescriptorSetHandle,
        color_grading_set: RhiDescriptorSetHandle,
    ) -> RenderResult<()> {
        let per_frame_set = ctx.resource_cache.per_frame_set();
        // 只有 per-frame 数据需要偏移，实例与骨骼矩阵的绑定不会被全屏 pass 读取
        let per_frame_offsets = [per_frame_offset, 0, 0];
        let scene = ctx.scene;

        // base pass
        self.begin_subpass(ctx, MainCameraSubpass::BASE_PASS);
        if self.pipeline_type == RenderPipelineType::Deferred {
            ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipelines.gbuffer);
            self.set_viewport(ctx);
            draw_mesh_nodes(
                ctx,
                &MeshDrawState {
                    pipeline: self.pipelines.gbuffer,
                    per_frame_offset,
                    with_material: true,
                    instance_kind: MeshInstanceKind::Mesh,
                    extra_sets: vec![],
                },
                scene.main_camera_visible_nodes(),
            )?;
        }

        // deferred lighting
        self.next_subpass(ctx, MainCameraSubpass::DEFERRED_LIGHTING);
        if self.pipeline_type == RenderPipelineType::Deferred {
            ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipelines.deferred_skybox);
            self.set_viewport(ctx);
            ctx.rhi.cmd_bind_descriptor_sets(
                ctx.cmd,
                self.pipelines.deferred_skybox,
                0,
                &[per_frame_set, lighting_set],
                &per_frame_offsets,
            );
            ctx.rhi.cmd_draw(ctx.cmd, 36, 1, 0, 0);

            ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipelines.deferred_lighting);
            self.set_viewport(ctx);
            ctx.rhi.cmd_bind_descriptor_sets(
                ctx.cmd,
                self.pipelines.deferred_lighting,
                0,
                &[per_frame_set, self.gbuffer_input_set, lighting_set],
                &per_frame_offsets,
            );
            ctx.rhi.cmd_draw(ctx.cmd, 3, 1, 0, 0);
        }

        // forward lighting
        self.next_subpass(ctx, MainCameraSubpass::FORWARD_LIGHTING);
        if self.pipeline_type == RenderPipelineType::Forward {
            ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipelines.forward_mesh);
            self.set_viewport(ctx);
            draw_mesh_nodes(
                ctx,
                &MeshDrawState {
                    pipeline: self.pipelines.forward_mesh,
                    per_frame_offset,
                    with_material: true,
                    instance_kind: MeshInstanceKind::Mesh,
                    extra_sets: vec![lighting_set],
                },
                scene.main_camera_visible_nodes(),
            )?;

            ctx.rhi.cmd_bind_pipeline(ctx.cmd, self.pipelines.forward_skybox);
            self.set_viewport(ctx);
            ctx.rhi.cmd_bind_descriptor_sets(
                ctx.cmd,
                self.pipelines.forward_skybox,
                0,
                &[per_frame_set, lighting_set],
                &per_frame_offsets,
            );
            ctx.rhi.cmd_draw(ctx.cmd, 36, 1, 0, 0);
        }

        // post process
        self.next_subpass(ctx, MainCameraSubpass::TONE_MAPPING);
        self.draw_full_screen(ctx, self.pipelines.tone_mapping, self.tone_mapping_set);

        self.next_subpass(ctx, MainCameraSubpass::COLOR_GRADING);
        self.draw_full_screen(ctx, self.pipelines.color_grading, color_grading_set);

        self.next_subpass(ctx, MainCameraSubpass::FXAA);
        if self.enable_fxaa {
            self.draw_full_screen(ctx, self.pipelines.fxaa, self.fxaa_set);
        }

        // ui
        self.next_subpass(ctx, MainCameraSubpass::UI);
        if let Some(axis_offset) = axis_offset {
            self.draw_axis(ctx, per_frame_offset, axis_offset);
        }
        if let Some(ui) = self.ui_overlay.as_mut() {
            ui.draw(ctx.rhi, ctx.cmd, &ctx.viewport);
        }

        self.next_subpass(ctx, MainCameraSubpass::COMBINE_UI);
        self.draw_full_screen(ctx, self.pipelines.combine_ui, self.combine_ui_set);
        ctx.rhi.cmd_end_label(ctx.cmd);
        Ok(())
    }

    fn begin_subpass(&self, ctx: &mut PassDrawContext, subpass: u32) {
        ctx.rhi.cmd_begin_label(
            ctx.cmd,
            &format!("[main-camera-pass]{}", MainCameraSubpass::NAMES[subpass as usize]),
            LabelColor::COLOR_SUBPASS,
        );
    }

    fn next_subpass(&self, ctx: &mut PassDrawContext, subpass: u32) {
        ctx.rhi.cmd_end_label(ctx.cmd);
        ctx.rhi.cmd_next_subpass(ctx.cmd);
        self.begin_subpass(ctx, subpass);
    }

    fn set_viewport(&self, ctx: &mut PassDrawContext) {
        ctx.rhi.cmd_set_viewport(ctx.cmd, ctx.viewport.viewport);
        ctx.rhi.cmd_set_scissor(ctx.cmd, ctx.viewport.scissor);
    }

    fn draw_full_screen(&self, ctx: &mut PassDrawContext, pipeline: RhiPipelineHandle, set: RhiDescriptorSetHandle) {
        ctx.rhi.cmd_bind_pipeline(ctx.cmd, pipeline);
        self.set_viewport(ctx);
        ctx.rhi.cmd_bind_descriptor_sets(ctx.cmd, pipeline, 0, &[set], &[]);
        ctx.rhi.cmd_draw(ctx.cmd, 3, 1, 0, 0);
    }

    fn draw_axis(&self, ctx: &mut PassDrawContext, per_frame_offset: u32, axis_offset: u32) {
        let scene = ctx.scene;
        let Some(axis) = scene.axis_node() else {
            return;
        };
        let Some(mesh) = ctx.resource_cache.mesh(axis.mesh_asset_id).copied() else {
            log::warn!("axis mesh {} is not uploaded", axis.mesh_asset_id);
            return;
        };

        let pipeline = self.pipelines.axis;
        ctx.rhi.cmd_bind_pipeline(ctx.cmd, pipeline);
        self.set_viewport(ctx);
        ctx.rhi.cmd_bind_descriptor_sets(
            ctx.cmd,
            pipeline,
            0,
            &[ctx.resource_cache.per_frame_set(), mesh.descriptor_set],
            &[per_frame_offset, axis_offset, 0],
        );
        ctx.rhi.cmd_bind_vertex_buffers(ctx.cmd, 0, &[(mesh.vertex_buffer, 0)]);
        ctx.rhi.cmd_bind_index_buffer(ctx.cmd, mesh.index_buffer, 0, mesh.index_type);
        ctx.rhi.cmd_draw_indexed(ctx.cmd, mesh.index_count, 1, 0, 0, 0);
    }
}

impl RenderPass for MainCameraPass {
    fn name(&self) -> &str {
        "main-camera"
    }

    fn draw(&mut self, ctx: &mut PassDrawContext) -> RenderResult<()> {
        let _span = tracy_client::span!("MainCameraPass::draw");
        if self.destroyed {
            return Err(RenderError::PassState("main camera pass is destroyed".to_string()));
        }
        let Some(framebuffer) = self.framebuffers.get(ctx.image_index as usize).copied() else {
            return Err(RenderError::PassState(format!(
                "swapchain image {} has no framebuffer ({} framebuffers)",
                ctx.image_index,
                self.framebuffers.len()
            )));
        };

        let per_frame = ctx.resource_cache.per_frame_data.mesh;
        let per_frame_offset = ctx.resource_cache.push_dynamic(
            ctx.rhi,
            ctx.frame_slot,
            bytemuck::bytes_of(&per_frame),
            PER_FRAME_BLOCK_RANGE,
        )?;
        let scene = ctx.scene;
        let axis_offset = match scene.axis_node() {
            Some(axis) if self.axis_visible => {
                let axis_data = AxisStorageBufferObject {
                    model_matrix: *axis.model_matrix,
                    selected_axis: self.selected_axis,
                    _padding_selected_axis: [0; 3],
                };
                Some(ctx.resource_cache.push_dynamic(
                    ctx.rhi,
                    ctx.frame_slot,
                    bytemuck::bytes_of(&axis_data),
                    INSTANCE_BLOCK_RANGE,
                )?)
            }
            _ => None,
        };
        let lighting_set = self.prepare_lighting_set(ctx.rhi, ctx.resource_cache, ctx.frame_slot)?;
        let color_grading_set = self.prepare_color_grading_set(ctx.rhi, ctx.resource_cache, ctx.frame_slot)?;

        let mut clear_values = vec![RhiClearValue::Color([0.0; 4]); MainCameraAttachment::OWNED_COUNT];
        clear_values[MainCameraAttachment::DEPTH as usize] = RhiClearValue::DepthStencil { depth: 1.0, stencil: 0 };
        clear_values.push(RhiClearValue::Color([0.0, 0.0, 0.0, 1.0]));

        ctx.rhi.cmd_begin_label(ctx.cmd, "[main-camera-pass]draw", LabelColor::COLOR_PASS);
        ctx.rhi.cmd_begin_render_pass(
            ctx.cmd,
            &RhiRenderPassBeginInfo {
                render_pass: self.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: self.extent,
                },
                clear_values,
            },
        );

        let result = self.record_subpasses(ctx, per_frame_offset, axis_offset, lighting_set, color_grading_set);
        if result.is_err() {
            // 中途失败时补齐 subpass 的 label
            ctx.rhi.cmd_end_label(ctx.cmd);
        }
        ctx.rhi.cmd_end_render_pass(ctx.cmd);
        ctx.rhi.cmd_end_label(ctx.cmd);
        result
    }

    fn update_after_framebuffer_recreate(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        let _span = tracy_client::span!("MainCameraPass::update_after_framebuffer_recreate");
        if self.destroyed {
            return Err(RenderError::PassState("main camera pass is destroyed".to_string()));
        }
        if targets.info.image_format != self.swapchain_format {
            self.recreate_format_dependent(rhi, resource_cache, targets)?;
        } else {
            self.destroy_size_dependent(rhi);
        }
        self.create_size_dependent(rhi, targets)?;
        log::info!(
            "main camera pass resized to {}x{}, {} framebuffers",
            self.extent.width,
            self.extent.height,
            self.framebuffers.len()
        );
        Ok(())
    }

    /// descriptor set 随 pool 一起释放
    fn destroy(&mut self, rhi: &mut dyn Rhi) {
        if let Some(mut ui) = self.ui_overlay.take() {
            ui.destroy(rhi);
        }
        self.destroy_size_dependent(rhi);
        for pipeline in std::mem::take(&mut self.pipelines).all() {
            rhi.destroy_pipeline(pipeline);
        }
        let layouts = std::mem::take(&mut self.layouts);
        for layout in [
            layouts.gbuffer_input,
            layouts.lighting,
            layouts.tone_mapping,
            layouts.color_grading,
            layouts.fxaa,
            layouts.combine_ui,
        ] {
            rhi.destroy_descriptor_set_layout(layout);
        }
        rhi.destroy_sampler(std::mem::take(&mut self.shadow_map_sampler));
        rhi.destroy_sampler(std::mem::take(&mut self.post_process_sampler));
        rhi.destroy_render_pass(std::mem::take(&mut self.render_pass));
        self.lighting_sets.clear();
        self.color_grading_sets.clear();
        self.destroyed = true;
    }
}
