use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use glam::{Mat4, Quat, Vec3};
use lumen_scene::{
    camera::RenderCameraType,
    game_object::{
        GameObjectDesc, GameObjectId, GameObjectMaterialDesc, GameObjectMeshDesc, GameObjectPartDesc,
        GameObjectTransformDesc,
    },
    swap_context::{CameraSwapData, RenderSwapContext},
};

use crate::demo_assets::{CHECKER_TEXTURE, CUBE_MESH, NORMAL_TEXTURE};

/// 网格每一行的 game object 数量
const GRID_WIDTH: u64 = 4;
const GRID_SPACING: f32 = 2.5;
const CAMERA_FOV_X: f32 = 60.0;
const CAMERA_ORBIT_RADIUS: f32 = 12.0;

#[derive(Debug, Clone, Copy)]
pub struct LogicWorldConfig {
    pub game_object_count: u64,
    /// 达到后逻辑线程退出
    pub tick_count: u64,
    pub tick_interval: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogicReport {
    pub ticks: u64,
    pub spawned: u64,
    pub deleted: u64,
}

/// 逻辑侧的场景：只通过 swap context 与渲染线程交流
pub struct LogicWorld {
    swap_context: Arc<RenderSwapContext>,
    config: LogicWorldConfig,

    game_objects: Vec<GameObjectId>,
    next_go_id: u64,
    report: LogicReport,
}

// new & init
impl LogicWorld {
    pub fn new(swap_context: Arc<RenderSwapContext>, config: LogicWorldConfig) -> Self {
        let mut world = Self {
            swap_context,
            config,
            game_objects: Vec::with_capacity(config.game_object_count as usize),
            next_go_id: 0,
            report: LogicReport::default(),
        };
        for _ in 0..config.game_object_count {
            world.spawn_game_object();
        }
        log::info!("logic world: spawned {} game objects", world.game_objects.len());
        world
    }

    fn spawn_game_object(&mut self) -> GameObjectId {
        let go_id = GameObjectId(self.next_go_id);
        self.next_go_id += 1;
        self.game_objects.push(go_id);
        self.report.spawned += 1;

        self.swap_context.add_dirty_game_object(Self::game_object_desc(go_id, 0.0));
        go_id
    }
}

// getters
impl LogicWorld {
    #[inline]
    pub fn game_objects(&self) -> &[GameObjectId] {
        &self.game_objects
    }

    #[inline]
    pub fn report(&self) -> LogicReport {
        self.report
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.report.ticks >= self.config.tick_count
    }
}

// update
impl LogicWorld {
    /// 推进一个逻辑帧：旋转所有物体，绕场景中心移动相机，中途删除第一个物体
    pub fn tick(&mut self) {
        let _span = tracy_client::span!("LogicWorld::tick");
        let tick = self.report.ticks;
        let time = tick as f32 * self.config.tick_interval.as_secs_f32();

        if tick == self.config.tick_count / 2 && !self.game_objects.is_empty() {
            let go_id = self.game_objects.remove(0);
            self.swap_context.add_delete_game_object(go_id);
            self.report.deleted += 1;
            log::info!("logic world: delete {} at tick {}", go_id, tick);
        }

        let game_objects = &self.game_objects;
        self.swap_context.logic_update(|swap_data| {
            for go_id in game_objects {
                swap_data.add_dirty_game_object(Self::game_object_desc(*go_id, time));
            }
            swap_data.set_camera_swap_data(CameraSwapData {
                fov_x: Some(CAMERA_FOV_X),
                camera_type: Some(RenderCameraType::Motor),
                view_matrix: Some(Self::camera_view(time)),
            });
        });

        self.report.ticks += 1;
    }
}

// tools
impl LogicWorld {
    /// 场景以 z 轴向上，物体排列在 xy 平面上
    fn grid_position(go_id: GameObjectId) -> Vec3 {
        let column = (go_id.0 % GRID_WIDTH) as f32;
        let row = (go_id.0 / GRID_WIDTH) as f32;
        let offset = (GRID_WIDTH - 1) as f32 * GRID_SPACING * 0.5;
        Vec3::new(column * GRID_SPACING - offset, -row * GRID_SPACING, 0.0)
    }

    /// 奇数 id 的物体使用贴图材质
    fn game_object_desc(go_id: GameObjectId, time: f32) -> GameObjectDesc {
        let with_texture = go_id.0 % 2 == 1;
        let material_desc = if with_texture {
            GameObjectMaterialDesc {
                base_color_texture_file: CHECKER_TEXTURE.to_string(),
                normal_texture_file: NORMAL_TEXTURE.to_string(),
                with_texture: true,
                ..Default::default()
            }
        } else {
            GameObjectMaterialDesc::default()
        };

        let rotation = Quat::from_rotation_z(time + go_id.0 as f32 * 0.3);
        let part = GameObjectPartDesc {
            mesh_desc: GameObjectMeshDesc {
                mesh_file: CUBE_MESH.to_string(),
            },
            material_desc,
            transform_desc: GameObjectTransformDesc {
                transform_matrix: Mat4::from_rotation_translation(rotation, Self::grid_position(go_id)),
            },
            ..Default::default()
        };
        GameObjectDesc::new(go_id, vec![part])
    }

    fn camera_view(time: f32) -> Mat4 {
        let angle = time * 0.5;
        let eye = Vec3::new(angle.cos() * CAMERA_ORBIT_RADIUS, angle.sin() * CAMERA_ORBIT_RADIUS, 4.0);
        Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Z)
    }
}

/// 在独立线程中运行逻辑，`running` 为 false 或 tick 数达到上限时退出
pub fn spawn_logic_thread(
    mut world: LogicWorld,
    running: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<LogicReport>> {
    thread::Builder::new()
        .name("LogicThread".to_string())
        .spawn(move || {
            tracy_client::set_thread_name!("LogicThread");
            while running.load(Ordering::SeqCst) && !world.is_finished() {
                world.tick();
                thread::sleep(world.config.tick_interval);
            }
            if !world.is_finished() {
                log::info!("logic thread: render thread stopped, exit early");
            }
            log::info!("logic thread: exited after {} ticks", world.report.ticks);
            world.report()
        })
        .context("failed to spawn logic thread")
}

#[cfg(test)]
mod tests {
    use lumen_scene::swap_context::GameObjectDelta;

    use super::*;

    fn config(game_object_count: u64, tick_count: u64) -> LogicWorldConfig {
        LogicWorldConfig {
            game_object_count,
            tick_count,
            tick_interval: Duration::from_millis(1),
        }
    }

    fn swap_and_take(swap_context: &RenderSwapContext) -> lumen_scene::swap_context::RenderSwapData {
        assert!(swap_context.swap());
        swap_context.take_render_swap_data()
    }

    #[test]
    fn test_spawn_submits_one_upsert_per_object() {
        let swap_context = Arc::new(RenderSwapContext::new());
        let world = LogicWorld::new(swap_context.clone(), config(5, 10));
        assert_eq!(world.game_objects().len(), 5);

        let data = swap_and_take(&swap_context);
        assert_eq!(data.game_object_deltas.len(), 5);
        assert!(data.camera_swap_data.is_none());

        let textured = data
            .game_object_deltas
            .iter()
            .filter(|delta| match delta {
                GameObjectDelta::Upsert(desc) => desc.object_parts()[0].material_desc.with_texture,
                GameObjectDelta::Remove(_) => false,
            })
            .count();
        assert_eq!(textured, 2);
    }

    #[test]
    fn test_tick_merges_upserts_and_sets_camera() {
        let swap_context = Arc::new(RenderSwapContext::new());
        let mut world = LogicWorld::new(swap_context.clone(), config(3, 10));
        world.tick();

        // 同一 game object 的 upsert 被合并
        let data = swap_and_take(&swap_context);
        assert_eq!(data.game_object_deltas.len(), 3);
        let camera = data.camera_swap_data.unwrap();
        assert_eq!(camera.camera_type, Some(RenderCameraType::Motor));
        assert_eq!(camera.fov_x, Some(CAMERA_FOV_X));
        assert!(camera.view_matrix.is_some());
    }

    #[test]
    fn test_delete_halfway() {
        let swap_context = Arc::new(RenderSwapContext::new());
        let mut world = LogicWorld::new(swap_context.clone(), config(2, 4));
        let first = world.game_objects()[0];
        let _ = swap_and_take(&swap_context);

        world.tick();
        world.tick();
        world.tick();
        assert_eq!(world.game_objects().len(), 1);
        assert_eq!(world.report().deleted, 1);

        let data = swap_and_take(&swap_context);
        assert!(data.game_object_deltas.iter().any(|delta| *delta == GameObjectDelta::Remove(first)));
        assert!(data.game_object_deltas.iter().all(|delta| match delta {
            GameObjectDelta::Upsert(desc) => desc.id() != first,
            GameObjectDelta::Remove(_) => true,
        }));
    }

    #[test]
    fn test_logic_thread_stops_at_tick_count() {
        let swap_context = Arc::new(RenderSwapContext::new());
        let world = LogicWorld::new(swap_context, config(1, 5));
        let handle = spawn_logic_thread(world, Arc::new(AtomicBool::new(true))).unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.ticks, 5);
        assert_eq!(report.spawned, 1);
    }

    #[test]
    fn test_logic_thread_stops_with_running_flag() {
        let swap_context = Arc::new(RenderSwapContext::new());
        let world = LogicWorld::new(swap_context, config(1, 1000));
        let handle = spawn_logic_thread(world, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(handle.join().unwrap().ticks, 0);
    }
}
