//! 渲染线程对外的唯一入口
//!
//! 每次 [`RenderSystem::tick`] 依次完成：交换逻辑线程的数据、上传资源、剔除、录制各个 pass、提交与呈现。

use std::sync::Arc;

use ash::vk;
use lumen_asset::{
    asset_loader::AssetLoader,
    global_rendering::GlobalRenderingConfig,
    source_desc::{MaterialSourceDesc, MeshSourceDesc},
};
use lumen_render_interface::{
    frame_counter::{FrameCounter, FrameSlot},
    frame_resources::FrameResources,
    render_settings::{RenderConfig, RenderPipelineType},
};
use lumen_rhi::{handles::RhiCommandBufferHandle, rhi::Rhi};
use lumen_scene::{
    camera::RenderCamera,
    game_object::{GameObjectDesc, GameObjectId, GameObjectPartDesc, GameObjectPartId},
    light::{AmbientLight, DirectionalLight},
    render_entity::RenderEntity,
    render_scene::RenderScene,
    swap_context::{CameraSwapData, GameObjectDelta, RenderSwapContext},
};

use crate::{
    error::{RenderError, RenderResult},
    passes::{pick::PickPass, ui::UiOverlay},
    pipeline::{RenderPipeline, RenderPipelineInitInfo},
    present::{AcquireOutcome, RenderPresent},
    render_pass::{PassDrawContext, RenderPass, RenderViewport},
    resource_cache::RenderResourceCache,
};

pub struct RenderSystemInitInfo {
    pub config: RenderConfig,
    pub global_rendering: GlobalRenderingConfig,
    pub asset_loader: Box<dyn AssetLoader>,
    pub ui_overlay: Option<Box<dyn UiOverlay>>,
}

/// 拥有 RHI 以及渲染线程上的全部状态
///
/// 销毁顺序由 [`RenderSystem::destroy`] 显式给出，销毁之后把 RHI 交还给调用方。
pub struct RenderSystem<R: Rhi> {
    rhi: R,
    config: RenderConfig,

    frame_counter: FrameCounter,
    frame_resources: FrameResources,
    resource_cache: RenderResourceCache,
    render_present: RenderPresent,
    render_pipeline: RenderPipeline,

    render_scene: RenderScene,
    render_camera: RenderCamera,
    swap_context: Arc<RenderSwapContext>,

    /// 引擎内容在 swapchain 中的区域
    viewport: RenderViewport,
    /// 编辑器设置过视口之后，重建 swapchain 不再覆盖它
    viewport_overridden: bool,
    framebuffer_resized: bool,
}

// new & init
impl<R: Rhi> RenderSystem<R> {
    pub fn new(mut rhi: R, init_info: RenderSystemInitInfo) -> RenderResult<Self> {
        let _span = tracy_client::span!("RenderSystem::new");
        let RenderSystemInitInfo {
            config,
            global_rendering,
            asset_loader,
            ui_overlay,
        } = init_info;
        config.validate()?;

        let frame_counter = FrameCounter::new(0, config.max_frames_in_flight);
        let frame_resources = FrameResources::new(&mut rhi, config.max_frames_in_flight, config.fence_timeout_ns)?;

        let resource_cache = match RenderResourceCache::new(&mut rhi, &config, asset_loader) {
            Ok(cache) => cache,
            Err(e) => {
                frame_resources.destroy(&mut rhi);
                return Err(e);
            }
        };

        let mut render_present =
            match RenderPresent::new(&mut rhi, config.initial_extent.into(), config.fence_timeout_ns) {
                Ok(present) => present,
                Err(e) => {
                    resource_cache.destroy(&mut rhi);
                    frame_resources.destroy(&mut rhi);
                    return Err(e.into());
                }
            };

        let render_pipeline = RenderPipeline::new(
            &mut rhi,
            &resource_cache,
            RenderPipelineInitInfo {
                config: &config,
                enable_fxaa: global_rendering.enable_fxaa,
                targets: render_present.targets(),
                ui_overlay,
            },
        );
        let render_pipeline = match render_pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                render_present.destroy(&mut rhi);
                resource_cache.destroy(&mut rhi);
                frame_resources.destroy(&mut rhi);
                return Err(e);
            }
        };

        let viewport = RenderViewport::full(render_present.extent());
        let mut render_system = Self {
            rhi,
            config,
            frame_counter,
            frame_resources,
            resource_cache,
            render_present,
            render_pipeline,
            render_scene: RenderScene::new(),
            render_camera: RenderCamera::new(),
            swap_context: Arc::new(RenderSwapContext::new()),
            viewport,
            viewport_overridden: false,
            framebuffer_resized: false,
        };

        if let Err(e) = render_system.init_level(&global_rendering) {
            return Err(render_system.destroy_on_error(e));
        }
        log::info!("render system created, {} frames in flight", render_system.config.max_frames_in_flight);
        Ok(render_system)
    }

    /// 相机、光照的默认值，以及关卡的全局资源
    fn init_level(&mut self, global_rendering: &GlobalRenderingConfig) -> RenderResult<()> {
        let camera_config = &global_rendering.camera_config;
        self.render_camera.look_at(camera_config.pose.position, camera_config.pose.target, camera_config.pose.up);
        self.render_camera.set_z_near_far(camera_config.z_near, camera_config.z_far);
        self.render_camera.set_aspect(camera_config.aspect);

        self.render_scene.ambient_light = AmbientLight {
            irradiance: global_rendering.ambient_light,
        };
        self.render_scene.directional_light = DirectionalLight {
            direction: global_rendering.directional_light.direction.normalize_or_zero(),
            color: global_rendering.directional_light.color,
        };

        self.resource_cache.upload_global_render_resource(
            &mut self.rhi,
            &global_rendering.level_resource_desc(),
            self.frame_counter.frame_id(),
        )
    }

    fn destroy_on_error(self, e: RenderError) -> RenderError {
        log::error!("render system init failed: {}", e);
        let _rhi = self.destroy();
        e
    }
}

// getters
impl<R: Rhi> RenderSystem<R> {
    /// 逻辑线程持有它的一个副本，用于提交增量数据
    #[inline]
    pub fn swap_context(&self) -> Arc<RenderSwapContext> {
        self.swap_context.clone()
    }

    #[inline]
    pub fn render_camera(&self) -> &RenderCamera {
        &self.render_camera
    }

    #[inline]
    pub fn render_camera_mut(&mut self) -> &mut RenderCamera {
        &mut self.render_camera
    }

    #[inline]
    pub fn render_scene(&self) -> &RenderScene {
        &self.render_scene
    }

    #[inline]
    pub fn resource_cache(&self) -> &RenderResourceCache {
        &self.resource_cache
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn viewport(&self) -> RenderViewport {
        self.viewport
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.render_present.extent()
    }

    #[inline]
    pub fn render_pipeline_type(&self) -> RenderPipelineType {
        self.render_pipeline.main_camera_pass().pipeline_type()
    }

    #[inline]
    pub fn rhi(&self) -> &R {
        &self.rhi
    }

    #[inline]
    pub fn rhi_mut(&mut self) -> &mut R {
        &mut self.rhi
    }

    #[inline]
    pub fn get_game_object_id_by_instance_id(&self, instance_id: usize) -> GameObjectId {
        self.render_scene.get_game_object_id_by_instance_id(instance_id)
    }
}

// update
impl<R: Rhi> RenderSystem<R> {
    /// 渲染一帧
    ///
    /// swapchain out of date 在内部重建，不会作为错误返回；返回的错误都是不可恢复的
    pub fn tick(&mut self) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderSystem::tick");

        let window_extent = self.render_present.window_extent();
        if window_extent.width == 0 || window_extent.height == 0 {
            // 窗口最小化时不渲染，增量数据留在逻辑侧
            return Ok(());
        }
        if self.framebuffer_resized {
            self.recreate_swapchain()?;
        }

        let frame_slot = self.frame_counter.frame_slot();
        let cmd = self.frame_resources.begin_slot(&mut self.rhi, &self.frame_counter)?;
        self.resource_cache.begin_frame(&mut self.rhi, &self.frame_counter);

        self.process_swap_data(cmd, frame_slot)?;
        self.prepare_frame_data();

        let image_available = self.frame_resources.slot(frame_slot).image_available;
        let (image_index, acquire_suboptimal) =
            match self.render_present.acquire_image(&mut self.rhi, image_available)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    // 本帧的上传已经录制，仍然需要提交并 signal fence
                    self.frame_resources.submit_slot(&mut self.rhi, &self.frame_counter, false)?;
                    self.frame_counter.next_frame();
                    return self.recreate_swapchain();
                }
            };

        {
            let _span = tracy_client::span!("RenderSystem::draw");
            let mut ctx = PassDrawContext {
                rhi: &mut self.rhi,
                resource_cache: &mut self.resource_cache,
                scene: &self.render_scene,
                targets: self.render_present.targets(),
                viewport: self.viewport,
                cmd,
                frame_slot,
                image_index,
            };
            self.render_pipeline.draw(&mut ctx)?;
        }

        self.frame_resources.submit_slot(&mut self.rhi, &self.frame_counter, true)?;
        let render_finished = self.frame_resources.slot(frame_slot).render_finished;
        let present_outcome = self.render_present.present_image(&mut self.rhi, image_index, render_finished)?;

        self.frame_counter.next_frame();
        tracy_client::frame_mark();

        if acquire_suboptimal || present_outcome.need_recreate() {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    /// 一次取走 render 侧的全部数据，按 关卡资源、game object、相机 的顺序处理
    fn process_swap_data(&mut self, cmd: RhiCommandBufferHandle, frame_slot: FrameSlot) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderSystem::process_swap_data");
        self.swap_context.swap();
        let mut swap_data = self.swap_context.take_render_swap_data();
        if swap_data.is_empty() {
            return Ok(());
        }

        if let Some(level_resource_desc) = swap_data.level_resource_desc.take() {
            match self.resource_cache.upload_global_render_resource(
                &mut self.rhi,
                &level_resource_desc,
                self.frame_counter.frame_id(),
            ) {
                Ok(()) => log::info!("{} level resource reloaded", self.frame_counter.frame_name()),
                Err(RenderError::Asset(e)) => {
                    log::error!("failed to load level resource, keep the previous one: {:#}", e)
                }
                Err(e) => return Err(e),
            }
        }

        while let Some(delta) = swap_data.game_object_deltas.pop_front() {
            match delta {
                GameObjectDelta::Upsert(desc) => self.upsert_game_object(cmd, frame_slot, &desc)?,
                GameObjectDelta::Remove(go_id) => self.render_scene.delete_entity_by_game_object_id(go_id),
            }
        }

        if let Some(camera_swap_data) = swap_data.camera_swap_data.take() {
            self.apply_camera_swap_data(camera_swap_data);
        }
        Ok(())
    }

    /// 资源读取失败的 part 被跳过，其余的 part 照常更新
    fn upsert_game_object(
        &mut self,
        cmd: RhiCommandBufferHandle,
        frame_slot: FrameSlot,
        desc: &GameObjectDesc,
    ) -> RenderResult<()> {
        let go_id = desc.id();
        for (part_index, part) in desc.object_parts().iter().enumerate() {
            let part_id = GameObjectPartId {
                go_id,
                part_id: part_index,
            };
            match self.create_render_entity(cmd, frame_slot, part_id, part) {
                Ok(entity) => {
                    let instance_id = entity.instance_id;
                    self.render_scene.add_or_update_entity(entity);
                    self.render_scene.add_instance_id_to_map(instance_id, go_id);
                }
                Err(RenderError::Asset(e)) => {
                    log::error!("skip part {} of {}: {:#}", part_index, go_id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn create_render_entity(
        &mut self,
        cmd: RhiCommandBufferHandle,
        frame_slot: FrameSlot,
        part_id: GameObjectPartId,
        part: &GameObjectPartDesc,
    ) -> RenderResult<RenderEntity> {
        let mesh_asset_id =
            self.resource_cache.get_or_create_mesh(&mut self.rhi, cmd, frame_slot, &part.mesh_source_desc())?;

        let material_source_desc = if part.material_desc.with_texture {
            part.material_desc.to_source_desc()
        } else {
            MaterialSourceDesc::default()
        };
        let material_asset_id =
            self.resource_cache.get_or_create_material(&mut self.rhi, cmd, frame_slot, &material_source_desc)?;

        let joint_matrices =
            if part.with_animation { part.skeleton_animation_result.transforms.clone() } else { Vec::new() };

        Ok(RenderEntity {
            instance_id: self.render_scene.instance_id_allocator_mut().alloc_guid(&part_id),
            model_matrix: part.transform_desc.transform_matrix,
            mesh_asset_id,
            enable_vertex_blending: part.with_animation,
            joint_matrices,
            bounding_box: self.resource_cache.get_cached_bounding_box(mesh_asset_id),
            material_asset_id,
            ..Default::default()
        })
    }

    fn apply_camera_swap_data(&mut self, camera_swap_data: CameraSwapData) {
        if let Some(fov_x) = camera_swap_data.fov_x {
            self.render_camera.set_fov_x(fov_x);
        }
        if let Some(camera_type) = camera_swap_data.camera_type {
            self.render_camera.set_current_camera_type(camera_type);
        }
        if let Some(view_matrix) = camera_swap_data.view_matrix {
            let camera_type = self.render_camera.camera_type();
            self.render_camera.set_main_view_matrix(view_matrix, camera_type);
        }
    }

    /// 相机的宽高比跟随视口，然后重建可见列表与 per-frame 数据
    fn prepare_frame_data(&mut self) {
        let _span = tracy_client::span!("RenderSystem::prepare_frame_data");
        let [width, height] = self.viewport.extent();
        self.render_camera.set_aspect(width / height);

        self.render_scene.update_visible_objects(&self.render_camera);
        self.resource_cache.per_frame_data.update(&self.render_scene, &self.render_camera, self.render_present.extent());
        self.resource_cache
            .per_frame_data
            .update_directional_light_proj_view(self.render_scene.directional_light_proj_view());
    }

    /// 同步重建：等待设备空闲、重建 swapchain，再通知每个 pass
    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderSystem::recreate_swapchain");
        self.framebuffer_resized = false;

        let old_format = self.render_present.swapchain_info().image_format;
        let info = self.render_present.rebuild_after_resized(&mut self.rhi)?;
        if info.image_format != old_format {
            log::info!("swapchain format changed: {:?} -> {:?}", old_format, info.image_format);
        }

        self.render_pipeline.update_after_framebuffer_recreate(
            &mut self.rhi,
            &self.resource_cache,
            &self.render_present.targets(),
        )?;
        if !self.viewport_overridden {
            self.viewport = RenderViewport::full(info.extent);
        }
        Ok(())
    }

    /// 窗口尺寸变化，下一次 tick 开始时重建 swapchain
    pub fn notify_window_resized(&mut self, window_extent: vk::Extent2D) {
        if self.render_present.window_extent() == window_extent {
            return;
        }
        log::info!("window resized: {}x{}", window_extent.width, window_extent.height);
        self.render_present.set_window_extent(window_extent);
        self.framebuffer_resized = true;
    }

    /// 编辑器中引擎内容所在的区域，相对于 swapchain 的左上角
    pub fn update_engine_content_viewport(&mut self, offset_x: f32, offset_y: f32, width: f32, height: f32) {
        self.viewport = RenderViewport::new([offset_x, offset_y], [width, height]);
        self.viewport_overridden = true;
    }

    #[inline]
    pub fn set_render_pipeline_type(&mut self, pipeline_type: RenderPipelineType) {
        self.config.render_pipeline_type = pipeline_type;
        self.render_pipeline.set_render_pipeline_type(pipeline_type);
    }

    /// 切换关卡时调用，已经上传的 mesh 与材质会保留
    pub fn clear_for_level_reloading(&mut self) {
        self.render_scene.clear_for_level_reloading();
    }
}

// editor
impl<R: Rhi> RenderSystem<R> {
    /// 上传坐标轴使用的 mesh，返回对应的 mesh id
    pub fn create_axis(&mut self, axis_meshes: &[MeshSourceDesc]) -> RenderResult<Vec<usize>> {
        let _span = tracy_client::span!("RenderSystem::create_axis");
        self.with_single_time_commands(|this, cmd, frame_slot| {
            axis_meshes
                .iter()
                .map(|desc| this.resource_cache.get_or_create_mesh(&mut this.rhi, cmd, frame_slot, desc))
                .collect()
        })
    }

    /// None 时隐藏坐标轴
    pub fn set_visible_axis(&mut self, axis: Option<RenderEntity>) {
        self.render_pipeline.set_axis_visible_state(axis.is_some());
        self.render_scene.set_render_axis(axis);
    }

    #[inline]
    pub fn set_selected_axis(&mut self, selected_axis: u32) {
        self.render_pipeline.set_selected_axis(selected_axis);
    }

    /// 返回 uv 处物体的 instance id，没有物体时返回 0
    ///
    /// uv 相对于引擎内容视口，超出渲染目标时直接返回 0
    pub fn get_guid_of_picked_mesh(&mut self, uv: [f32; 2]) -> RenderResult<usize> {
        let _span = tracy_client::span!("RenderSystem::get_guid_of_picked_mesh");
        let Some(pixel) = PickPass::pixel_of(&self.viewport, self.render_present.extent(), uv) else {
            return Ok(0);
        };

        self.render_pipeline.pick_pass_mut().set_pick_pixel(pixel);
        self.with_single_time_commands(|this, cmd, frame_slot| {
            let mut ctx = PassDrawContext {
                rhi: &mut this.rhi,
                resource_cache: &mut this.resource_cache,
                scene: &this.render_scene,
                targets: this.render_present.targets(),
                viewport: this.viewport,
                cmd,
                frame_slot,
                image_index: 0,
            };
            this.render_pipeline.pick_pass_mut().draw(&mut ctx)
        })?;

        let instance_id = self.render_pipeline.pick_pass_mut().read_picked_id(&mut self.rhi)?;
        log::debug!("pick ({}, {}) -> {}", pixel.0, pixel.1, instance_id);
        Ok(instance_id as usize)
    }

    /// 使用下一帧的 slot 录制一次性的命令
    ///
    /// 先等待该 slot 的 fence，保证 ring buffer 中的区域不再被 GPU 读取
    fn with_single_time_commands<T>(
        &mut self,
        f: impl FnOnce(&mut Self, RhiCommandBufferHandle, FrameSlot) -> RenderResult<T>,
    ) -> RenderResult<T> {
        let frame_slot = self.frame_counter.frame_slot();
        let fence = self.frame_resources.slot(frame_slot).fence;
        self.rhi.wait_for_fences(&[fence], self.config.fence_timeout_ns)?;
        self.resource_cache.reset_ring_slot(frame_slot);

        let cmd = self.rhi.begin_single_time_commands()?;
        let result = f(self, cmd, frame_slot);
        // 录制失败时也要结束 command buffer
        let submitted = self.rhi.end_single_time_commands(cmd);
        let value = result?;
        submitted?;
        Ok(value)
    }
}

// destroy
impl<R: Rhi> RenderSystem<R> {
    /// 等待设备空闲后按依赖的逆序销毁，返回 RHI
    pub fn destroy(self) -> R {
        let _span = tracy_client::span!("RenderSystem::destroy");
        let Self {
            mut rhi,
            frame_resources,
            resource_cache,
            mut render_present,
            mut render_pipeline,
            ..
        } = self;

        if let Err(e) = rhi.device_wait_idle() {
            log::error!("device wait idle failed before destroy: {}", e);
        }
        render_pipeline.destroy(&mut rhi);
        resource_cache.destroy(&mut rhi);
        frame_resources.destroy(&mut rhi);
        render_present.destroy(&mut rhi);
        log::info!("render system destroyed");
        rhi
    }
}

#[cfg(test)]
mod tests;
