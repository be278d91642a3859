use lumen_render_interface::render_settings::{RenderConfig, RenderPipelineType};
use lumen_rhi::rhi::Rhi;

use crate::{
    error::RenderResult,
    passes::{
        directional_light_shadow::DirectionalLightShadowPass,
        main_camera::{MainCameraPass, MainCameraPassInitInfo},
        pick::PickPass,
        point_light_shadow::PointLightShadowPass,
        ui::UiOverlay,
    },
    render_pass::{PassDrawContext, RenderPass, SwapchainTargets},
    resource_cache::RenderResourceCache,
};

pub struct RenderPipelineInitInfo<'a> {
    pub config: &'a RenderConfig,
    pub enable_fxaa: bool,
    pub targets: SwapchainTargets<'a>,
    pub ui_overlay: Option<Box<dyn UiOverlay>>,
}

/// 固定顺序的 pass 组合
///
/// 阴影贴图在主相机 pass 中被采样，因此两个阴影 pass 总是先于主相机 pass 录制。
/// pick pass 不在每帧的序列中，只在查询时使用。
pub struct RenderPipeline {
    directional_light_shadow_pass: DirectionalLightShadowPass,
    point_light_shadow_pass: PointLightShadowPass,
    main_camera_pass: MainCameraPass,
    pick_pass: PickPass,
}

// new & init
impl RenderPipeline {
    pub fn new(
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        init_info: RenderPipelineInitInfo,
    ) -> RenderResult<Self> {
        let _span = tracy_client::span!("RenderPipeline::new");
        let config = init_info.config;

        let mut directional_light_shadow_pass =
            DirectionalLightShadowPass::new(rhi, resource_cache, config.directional_light_shadow_map_dimension)?;
        let mut point_light_shadow_pass =
            match PointLightShadowPass::new(rhi, resource_cache, config.point_light_shadow_map_dimension) {
                Ok(pass) => pass,
                Err(e) => {
                    directional_light_shadow_pass.destroy(rhi);
                    return Err(e);
                }
            };
        let main_camera_pass = MainCameraPass::new(
            rhi,
            resource_cache,
            config.max_frames_in_flight,
            MainCameraPassInitInfo {
                enable_fxaa: init_info.enable_fxaa,
                pipeline_type: config.render_pipeline_type,
                directional_light_shadow_map: directional_light_shadow_pass.shadow_map_view(),
                point_light_shadow_map: point_light_shadow_pass.shadow_map_view(),
                targets: init_info.targets,
                ui_overlay: init_info.ui_overlay,
            },
        );
        let mut main_camera_pass = match main_camera_pass {
            Ok(pass) => pass,
            Err(e) => {
                point_light_shadow_pass.destroy(rhi);
                directional_light_shadow_pass.destroy(rhi);
                return Err(e);
            }
        };
        let pick_pass = match PickPass::new(rhi, resource_cache, &init_info.targets) {
            Ok(pass) => pass,
            Err(e) => {
                main_camera_pass.destroy(rhi);
                point_light_shadow_pass.destroy(rhi);
                directional_light_shadow_pass.destroy(rhi);
                return Err(e);
            }
        };

        log::info!("render pipeline created");
        Ok(Self {
            directional_light_shadow_pass,
            point_light_shadow_pass,
            main_camera_pass,
            pick_pass,
        })
    }
}

// getters
impl RenderPipeline {
    /// 每帧按顺序执行的 pass
    fn frame_passes_mut(&mut self) -> [&mut dyn RenderPass; 3] {
        [
            &mut self.directional_light_shadow_pass,
            &mut self.point_light_shadow_pass,
            &mut self.main_camera_pass,
        ]
    }

    /// 每帧 pass 的名字，按执行顺序
    pub fn frame_pass_names(&self) -> [&str; 3] {
        [
            self.directional_light_shadow_pass.name(),
            self.point_light_shadow_pass.name(),
            self.main_camera_pass.name(),
        ]
    }

    #[inline]
    pub fn main_camera_pass(&self) -> &MainCameraPass {
        &self.main_camera_pass
    }

    #[inline]
    pub fn pick_pass_mut(&mut self) -> &mut PickPass {
        &mut self.pick_pass
    }
}

// update
impl RenderPipeline {
    /// 任意一个 pass 失败都会中止整帧的录制
    pub fn draw(&mut self, ctx: &mut PassDrawContext) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderPipeline::draw");
        for pass in self.frame_passes_mut() {
            pass.draw(ctx).inspect_err(|e| log::error!("pass <{}> failed: {}", pass.name(), e))?;
        }
        Ok(())
    }

    /// 调用前需要 device idle
    pub fn update_after_framebuffer_recreate(
        &mut self,
        rhi: &mut dyn Rhi,
        resource_cache: &RenderResourceCache,
        targets: &SwapchainTargets,
    ) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderPipeline::update_after_framebuffer_recreate");
        for pass in self.frame_passes_mut() {
            pass.update_after_framebuffer_recreate(rhi, resource_cache, targets)?;
        }
        self.pick_pass.update_after_framebuffer_recreate(rhi, resource_cache, targets)
    }

    #[inline]
    pub fn set_render_pipeline_type(&mut self, pipeline_type: RenderPipelineType) {
        self.main_camera_pass.set_render_pipeline_type(pipeline_type);
    }

    #[inline]
    pub fn set_axis_visible_state(&mut self, visible: bool) {
        self.main_camera_pass.set_axis_visible_state(visible);
    }

    #[inline]
    pub fn set_selected_axis(&mut self, selected_axis: u32) {
        self.main_camera_pass.set_selected_axis(selected_axis);
    }
}

// destroy
impl RenderPipeline {
    /// 调用前需要 device idle，可以重复调用
    pub fn destroy(&mut self, rhi: &mut dyn Rhi) {
        self.pick_pass.destroy(rhi);
        for pass in self.frame_passes_mut().into_iter().rev() {
            pass.destroy(rhi);
        }
        log::info!("render pipeline destroyed");
    }
}
