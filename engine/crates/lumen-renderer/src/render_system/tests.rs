use glam::{Mat4, Vec3};
use lumen_asset::{
    memory_loader::{LoadCounter, MemoryAssetLoader},
    mesh_data::MeshData,
    source_desc::{LevelResourceDesc, MeshSourceDesc},
};
use lumen_render_interface::render_settings::WindowExtent;
use lumen_rhi::headless::{HeadlessFault, HeadlessRhi, command::HeadlessCommand};
use lumen_scene::{
    camera::RenderCameraType,
    game_object::{GameObjectMeshDesc, GameObjectTransformDesc},
};

use super::*;

fn test_config() -> RenderConfig {
    RenderConfig {
        max_frames_in_flight: 2,
        ring_buffer_size: 2 * 256 * 1024,
        point_light_shadow_map_dimension: 16,
        directional_light_shadow_map_dimension: 16,
        initial_extent: WindowExtent { width: 64, height: 32 },
        ..Default::default()
    }
}

fn new_system() -> (RenderSystem<HeadlessRhi>, LoadCounter) {
    lumen_crate_tools::init_log::init_test_log();
    let loader = MemoryAssetLoader::new().with_mesh("cube.obj", MeshData::cube());
    let counter = loader.counter();
    let mut rhi = HeadlessRhi::new();
    PickPass::register_headless_program(&mut rhi);
    let system = RenderSystem::new(
        rhi,
        RenderSystemInitInfo {
            config: test_config(),
            global_rendering: GlobalRenderingConfig::default(),
            asset_loader: Box::new(loader),
            ui_overlay: None,
        },
    )
    .unwrap();
    (system, counter)
}

fn part(mesh_file: &str, translation: Vec3) -> GameObjectPartDesc {
    GameObjectPartDesc {
        mesh_desc: GameObjectMeshDesc {
            mesh_file: mesh_file.to_string(),
        },
        transform_desc: GameObjectTransformDesc {
            transform_matrix: Mat4::from_translation(translation),
        },
        ..Default::default()
    }
}

fn cube_object(id: u64) -> GameObjectDesc {
    GameObjectDesc::new(GameObjectId(id), vec![part("cube.obj", Vec3::ZERO)])
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// 相机位于 -x 方向 5 个单位处看向原点，单位立方体占据画面的中心
fn look_at_origin(system: &RenderSystem<HeadlessRhi>) {
    system.swap_context().set_camera_swap_data(CameraSwapData {
        fov_x: Some(90.0),
        camera_type: Some(RenderCameraType::Motor),
        view_matrix: Some(Mat4::look_at_rh(Vec3::new(-5.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z)),
    });
}

/// 帧 command buffer 中每个 pass 的 draw label，按录制顺序
fn recorded_pass_labels(system: &RenderSystem<HeadlessRhi>, slot: usize) -> Vec<String> {
    let cmd = system.frame_resources.command_buffer(FrameSlot::from_usize(slot));
    system
        .rhi()
        .recorded_commands(cmd)
        .unwrap_or_default()
        .iter()
        .filter_map(|command| match command {
            HeadlessCommand::BeginLabel(label) if label.ends_with("]draw") => Some(label.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_cube_requested_three_times_is_uploaded_once() {
    let (mut system, counter) = new_system();
    let swap_context = system.swap_context();
    for id in 1..=3 {
        swap_context.add_dirty_game_object(cube_object(id));
    }
    system.tick().unwrap();

    swap_context.add_dirty_game_object(cube_object(4));
    system.tick().unwrap();

    assert_eq!(counter.mesh_load_count("cube.obj"), 1);
    assert_eq!(system.resource_cache().mesh_guid_allocator().len(), 1);
    assert_eq!(system.render_scene().render_entities().len(), 4);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_frames_advance_without_validation_errors() {
    let (mut system, _) = new_system();
    // 全局资源在初始化时通过 single-time command 上传
    let submits = system.rhi().stats().submits;
    system.swap_context().add_dirty_game_object(cube_object(1));
    for _ in 0..5 {
        system.tick().unwrap();
    }

    assert_eq!(system.frame_counter().frame_id(), 5);
    assert_eq!(system.rhi().stats().presents, 5);
    assert_eq!(system.rhi().stats().submits, submits + 5);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_present_out_of_date_recreates_before_next_frame() {
    let (mut system, _) = new_system();
    system.tick().unwrap();
    let presents = system.rhi().stats().presents;
    let wait_idle = system.rhi().stats().device_wait_idle;
    let swapchains = system.rhi().stats().swapchains_created;

    system.rhi_mut().inject_present_fault(HeadlessFault::OutOfDate);
    system.tick().unwrap();
    // 这一帧的 image 没有被 present
    assert_eq!(system.rhi().stats().presents, presents);
    assert_eq!(system.rhi().stats().device_wait_idle, wait_idle + 1);
    assert_eq!(system.rhi().stats().swapchains_created, swapchains + 1);

    system.tick().unwrap();
    assert_eq!(system.rhi().stats().presents, presents + 1);
    assert_eq!(system.frame_counter().frame_id(), 3);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_acquire_out_of_date_still_submits_uploads() {
    let (mut system, counter) = new_system();
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.rhi_mut().inject_acquire_fault(HeadlessFault::OutOfDate);
    let swapchains = system.rhi().stats().swapchains_created;
    let submits = system.rhi().stats().submits;

    system.tick().unwrap();
    assert_eq!(system.rhi().stats().submits, submits + 1);
    assert_eq!(system.rhi().stats().presents, 0);
    assert_eq!(system.rhi().stats().swapchains_created, swapchains + 1);
    assert_eq!(counter.mesh_load_count("cube.obj"), 1);
    assert_eq!(system.render_scene().render_entities().len(), 1);

    system.tick().unwrap();
    assert_eq!(system.rhi().stats().presents, 1);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_suboptimal_present_is_presented_then_recreated() {
    let (mut system, _) = new_system();
    let swapchains = system.rhi().stats().swapchains_created;
    system.rhi_mut().inject_present_fault(HeadlessFault::Suboptimal);

    system.tick().unwrap();
    assert_eq!(system.rhi().stats().presents, 1);
    assert_eq!(system.rhi().stats().swapchains_created, swapchains + 1);
    system.destroy();
}

#[test]
fn test_device_lost_on_submit_is_fatal() {
    let (mut system, _) = new_system();
    system.rhi_mut().inject_submit_fault(HeadlessFault::DeviceLost);

    let err = system.tick().unwrap_err();
    assert!(err.is_device_lost());
    assert_eq!(system.rhi().stats().presents, 0);
    system.destroy();
}

#[test]
fn test_resize_recreates_swapchain_on_next_tick() {
    let (mut system, _) = new_system();
    system.tick().unwrap();

    system.notify_window_resized(extent(128, 96));
    assert_eq!(system.swapchain_extent(), extent(64, 32));
    system.tick().unwrap();

    assert_eq!(system.swapchain_extent(), extent(128, 96));
    assert_eq!(system.viewport(), RenderViewport::full(extent(128, 96)));
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_minimized_window_skips_frame() {
    let (mut system, _) = new_system();
    let submits = system.rhi().stats().submits;
    system.notify_window_resized(extent(0, 0));
    system.tick().unwrap();

    assert_eq!(system.frame_counter().frame_id(), 0);
    assert_eq!(system.rhi().stats().submits, submits);
    system.destroy();
}

#[test]
fn test_remove_deletes_all_parts() {
    let (mut system, _) = new_system();
    let swap_context = system.swap_context();
    swap_context.add_dirty_game_object(GameObjectDesc::new(
        GameObjectId(7),
        vec![part("cube.obj", Vec3::ZERO), part("cube.obj", Vec3::X * 2.0)],
    ));
    system.tick().unwrap();

    let entities = system.render_scene().render_entities();
    assert_eq!(entities.len(), 2);
    let instance_id = entities[0].instance_id;
    assert_eq!(system.get_game_object_id_by_instance_id(instance_id), GameObjectId(7));

    swap_context.add_delete_game_object(GameObjectId(7));
    system.tick().unwrap();
    assert!(system.render_scene().render_entities().is_empty());
    assert!(!system.get_game_object_id_by_instance_id(instance_id).is_valid());
    system.destroy();
}

#[test]
fn test_missing_mesh_skips_only_that_part() {
    let (mut system, _) = new_system();
    system.swap_context().add_dirty_game_object(GameObjectDesc::new(
        GameObjectId(1),
        vec![part("cube.obj", Vec3::ZERO), part("missing.obj", Vec3::ZERO)],
    ));

    system.tick().unwrap();
    assert_eq!(system.render_scene().render_entities().len(), 1);
    system.destroy();
}

#[test]
fn test_failed_level_reload_keeps_previous_resource() {
    let (mut system, _) = new_system();
    let version = system.resource_cache().global_resource_version();

    let mut desc = LevelResourceDesc::default();
    desc.ibl_resource_desc.brdf_map = "missing_brdf.png".to_string();
    system.swap_context().set_level_resource(desc);
    system.tick().unwrap();

    assert_eq!(system.resource_cache().global_resource_version(), version);
    assert!(system.resource_cache().global_resource().is_some());

    system.swap_context().set_level_resource(LevelResourceDesc::default());
    system.tick().unwrap();
    assert_eq!(system.resource_cache().global_resource_version(), version + 1);
    system.destroy();
}

#[test]
fn test_camera_swap_data_is_applied() {
    let (mut system, _) = new_system();
    system.swap_context().set_camera_swap_data(CameraSwapData {
        fov_x: Some(60.0),
        ..Default::default()
    });
    system.tick().unwrap();

    assert!((system.render_camera().fov().x - 60.0).abs() < 1e-4);
    system.destroy();
}

#[test]
fn test_pick_outside_viewport_returns_zero_without_submit() {
    let (mut system, _) = new_system();
    system.tick().unwrap();
    let single_time_submits = system.rhi().stats().single_time_submits;

    assert_eq!(system.get_guid_of_picked_mesh([1.5, 0.5]).unwrap(), 0);
    assert_eq!(system.get_guid_of_picked_mesh([-0.5, 0.5]).unwrap(), 0);
    assert_eq!(system.rhi().stats().single_time_submits, single_time_submits);
    system.destroy();
}

#[test]
fn test_pick_on_empty_scene_returns_zero() {
    let (mut system, _) = new_system();
    system.tick().unwrap();
    let single_time_submits = system.rhi().stats().single_time_submits;
    let copies = system.rhi().stats().copy_commands;

    assert_eq!(system.get_guid_of_picked_mesh([0.5, 0.5]).unwrap(), 0);
    assert_eq!(system.rhi().stats().single_time_submits, single_time_submits + 1);
    assert!(system.rhi().stats().copy_commands > copies);

    // pick 之后帧循环照常进行
    system.tick().unwrap();
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_pick_visible_entity_returns_instance_id() {
    let (mut system, _) = new_system();
    look_at_origin(&system);
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.tick().unwrap();
    let instance_id = system.render_scene().render_entities()[0].instance_id;
    assert_ne!(instance_id, 0);

    assert_eq!(system.get_guid_of_picked_mesh([0.5, 0.5]).unwrap(), instance_id);
    // 角落只有背景
    assert_eq!(system.get_guid_of_picked_mesh([0.02, 0.02]).unwrap(), 0);
    assert_eq!(system.get_guid_of_picked_mesh([0.98, 0.98]).unwrap(), 0);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_pick_returns_front_entity() {
    let (mut system, _) = new_system();
    look_at_origin(&system);
    let swap_context = system.swap_context();
    swap_context.add_dirty_game_object(GameObjectDesc::new(GameObjectId(1), vec![part("cube.obj", Vec3::new(3.0, 0.0, 0.0))]));
    swap_context.add_dirty_game_object(GameObjectDesc::new(GameObjectId(2), vec![part("cube.obj", Vec3::ZERO)]));
    system.tick().unwrap();

    let front = system
        .render_scene()
        .render_entities()
        .iter()
        .find(|entity| system.render_scene().get_game_object_id_by_instance_id(entity.instance_id) == GameObjectId(2))
        .map(|entity| entity.instance_id)
        .unwrap();
    assert_eq!(system.get_guid_of_picked_mesh([0.5, 0.5]).unwrap(), front);
    system.destroy();
}

#[test]
fn test_frame_passes_recorded_in_fixed_order() {
    let (mut system, _) = new_system();
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.tick().unwrap();

    assert_eq!(
        recorded_pass_labels(&system, 0),
        vec![
            "[directional-light-shadow-pass]draw",
            "[point-light-shadow-pass]draw",
            "[main-camera-pass]draw",
        ]
    );
    assert_eq!(
        system.render_pipeline.frame_pass_names(),
        ["directional-light-shadow", "point-light-shadow", "main-camera"]
    );

    // pick 使用单独的 command buffer，不改变帧内的顺序
    system.get_guid_of_picked_mesh([0.5, 0.5]).unwrap();
    system.tick().unwrap();
    let labels = recorded_pass_labels(&system, 1);
    assert_eq!(labels.len(), 3);
    assert!(labels.iter().all(|label| label != "[pick-pass]draw"));
    system.destroy();
}

#[test]
fn test_swapchain_format_change_rebuilds_main_camera_pass() {
    let (mut system, _) = new_system();
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.tick().unwrap();
    let render_passes = system.rhi().stats().render_passes_created;
    let pipelines = system.rhi().live_pipeline_count();
    let old_render_pass = system.render_pipeline.main_camera_pass().render_pass();
    let presents = system.rhi().stats().presents;

    system.rhi_mut().set_surface_format(vk::Format::B8G8R8A8_SRGB);
    system.notify_window_resized(extent(128, 96));
    system.tick().unwrap();
    system.tick().unwrap();

    assert_eq!(system.render_present.swapchain_info().image_format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(system.swapchain_extent(), extent(128, 96));
    assert!(system.rhi().stats().render_passes_created > render_passes);
    assert_ne!(system.render_pipeline.main_camera_pass().render_pass(), old_render_pass);
    // 旧的 pipeline 都已销毁
    assert_eq!(system.rhi().live_pipeline_count(), pipelines);
    assert_eq!(system.rhi().stats().presents, presents + 2);
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_content_viewport_survives_recreate() {
    let (mut system, _) = new_system();
    system.update_engine_content_viewport(8.0, 4.0, 32.0, 16.0);
    system.notify_window_resized(extent(80, 40));
    system.tick().unwrap();

    assert_eq!(system.viewport(), RenderViewport::new([8.0, 4.0], [32.0, 16.0]));
    assert!((system.render_camera().aspect() - 2.0).abs() < 1e-4);
    system.destroy();
}

#[test]
fn test_axis_upload_and_visibility() {
    let (mut system, counter) = new_system();
    let axis_meshes = [MeshSourceDesc {
        mesh_file: "cube.obj".to_string(),
    }];
    let ids = system.create_axis(&axis_meshes).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(counter.mesh_load_count("cube.obj"), 1);

    system.set_visible_axis(Some(RenderEntity {
        mesh_asset_id: ids[0],
        ..Default::default()
    }));
    system.set_selected_axis(1);
    system.tick().unwrap();
    assert!(system.render_scene().render_axis().is_some());

    system.set_visible_axis(None);
    system.tick().unwrap();
    assert!(system.render_scene().render_axis().is_none());
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_switch_pipeline_type() {
    let (mut system, _) = new_system();
    assert_eq!(system.render_pipeline_type(), RenderPipelineType::Deferred);
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.tick().unwrap();

    system.set_render_pipeline_type(RenderPipelineType::Forward);
    assert_eq!(system.render_pipeline_type(), RenderPipelineType::Forward);
    system.tick().unwrap();
    assert!(system.rhi().validation_messages().is_empty());
    system.destroy();
}

#[test]
fn test_destroy_releases_gpu_objects() {
    let (mut system, _) = new_system();
    system.swap_context().add_dirty_game_object(cube_object(1));
    system.tick().unwrap();
    system.get_guid_of_picked_mesh([0.5, 0.5]).unwrap();

    let rhi = system.destroy();
    assert_eq!(rhi.live_buffer_count(), 0);
    assert_eq!(rhi.live_image_count(), 0);
    assert_eq!(rhi.live_pipeline_count(), 0);
    assert_eq!(rhi.live_framebuffer_count(), 0);
    assert_eq!(rhi.live_render_pass_count(), 0);
    assert_eq!(rhi.live_descriptor_set_count(), 0);
}
