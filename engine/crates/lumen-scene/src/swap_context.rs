//! 逻辑线程与渲染线程之间的双缓冲
//!
//! 逻辑线程只写 logic 侧，渲染线程每帧调用一次 [`RenderSwapContext::swap`]，
//! 在同一把锁内交换两侧，然后一次性取走 render 侧的全部数据。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use glam::Mat4;
use lumen_asset::source_desc::LevelResourceDesc;

use crate::camera::RenderCameraType;
use crate::game_object::{GameObjectDesc, GameObjectId};

#[derive(Debug, Clone, PartialEq)]
pub enum GameObjectDelta {
    Upsert(GameObjectDesc),
    Remove(GameObjectId),
}

impl GameObjectDelta {
    #[inline]
    pub fn go_id(&self) -> GameObjectId {
        match self {
            Self::Upsert(desc) => desc.id(),
            Self::Remove(go_id) => *go_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSwapData {
    pub fov_x: Option<f32>,
    pub camera_type: Option<RenderCameraType>,
    pub view_matrix: Option<Mat4>,
}

/// 一批增量数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderSwapData {
    pub level_resource_desc: Option<LevelResourceDesc>,
    /// 按提交顺序处理
    pub game_object_deltas: VecDeque<GameObjectDelta>,
    pub camera_swap_data: Option<CameraSwapData>,
}

impl RenderSwapData {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.level_resource_desc.is_none() && self.game_object_deltas.is_empty() && self.camera_swap_data.is_none()
    }

    /// 同一个 game object 的新 upsert 或 remove 会覆盖之前的 upsert
    pub fn add_dirty_game_object(&mut self, desc: GameObjectDesc) {
        let go_id = desc.id();
        self.game_object_deltas.retain(|delta| !matches!(delta, GameObjectDelta::Upsert(d) if d.id() == go_id));
        self.game_object_deltas.push_back(GameObjectDelta::Upsert(desc));
    }

    pub fn add_delete_game_object(&mut self, go_id: GameObjectId) {
        self.game_object_deltas.retain(|delta| delta.go_id() != go_id);
        self.game_object_deltas.push_back(GameObjectDelta::Remove(go_id));
    }

    pub fn set_level_resource(&mut self, desc: LevelResourceDesc) {
        self.level_resource_desc = Some(desc);
    }

    /// 多次设置时按字段合并
    pub fn set_camera_swap_data(&mut self, data: CameraSwapData) {
        let merged = match self.camera_swap_data.take() {
            Some(old) => CameraSwapData {
                fov_x: data.fov_x.or(old.fov_x),
                camera_type: data.camera_type.or(old.camera_type),
                view_matrix: data.view_matrix.or(old.view_matrix),
            },
            None => data,
        };
        self.camera_swap_data = Some(merged);
    }

    /// 丢弃不合法的增量：无效的 game object id，或者 mesh 文件为空的 part
    fn validate(&mut self) -> usize {
        let before = self.game_object_deltas.len();
        self.game_object_deltas.retain(|delta| {
            let valid = match delta {
                GameObjectDelta::Upsert(desc) => {
                    desc.id().is_valid() && desc.object_parts().iter().all(|part| !part.mesh_desc.mesh_file.is_empty())
                }
                GameObjectDelta::Remove(go_id) => go_id.is_valid(),
            };
            if !valid {
                log::warn!("drop invalid game object delta of {}", delta.go_id());
            }
            valid
        });
        before - self.game_object_deltas.len()
    }
}

#[derive(Default)]
struct SwapBuffers {
    logic: RenderSwapData,
    render: RenderSwapData,
}

/// 在两个线程之间共享，通常放在 `Arc` 中
#[derive(Default)]
pub struct RenderSwapContext {
    buffers: Mutex<SwapBuffers>,
}

// new & init
impl RenderSwapContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SwapBuffers> {
        // 持锁的一方 panic 后数据仍然是完整的一批，继续使用
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// logic side
impl RenderSwapContext {
    /// 在一次加锁中修改多个字段
    pub fn logic_update<R>(&self, f: impl FnOnce(&mut RenderSwapData) -> R) -> R {
        f(&mut self.lock().logic)
    }

    pub fn add_dirty_game_object(&self, desc: GameObjectDesc) {
        self.logic_update(|data| data.add_dirty_game_object(desc));
    }

    pub fn add_delete_game_object(&self, go_id: GameObjectId) {
        self.logic_update(|data| data.add_delete_game_object(go_id));
    }

    pub fn set_level_resource(&self, desc: LevelResourceDesc) {
        self.logic_update(|data| data.set_level_resource(desc));
    }

    pub fn set_camera_swap_data(&self, data: CameraSwapData) {
        self.logic_update(|swap_data| swap_data.set_camera_swap_data(data));
    }
}

// render side
impl RenderSwapContext {
    /// render 侧已经取空时才交换，返回是否发生了交换
    pub fn swap(&self) -> bool {
        let _span = tracy_client::span!("RenderSwapContext::swap");
        let mut buffers = self.lock();
        if !buffers.render.is_empty() || buffers.logic.is_empty() {
            return false;
        }

        let buffers = &mut *buffers;
        std::mem::swap(&mut buffers.logic, &mut buffers.render);
        let dropped = buffers.render.validate();
        if dropped > 0 {
            log::warn!("{} invalid deltas dropped at swap", dropped);
        }
        true
    }

    /// 一次性取走 render 侧的所有数据
    pub fn take_render_swap_data(&self) -> RenderSwapData {
        std::mem::take(&mut self.lock().render)
    }

    pub fn is_render_side_empty(&self) -> bool {
        self.lock().render.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::game_object::{GameObjectMeshDesc, GameObjectPartDesc};

    fn object(id: u64, mesh_file: &str) -> GameObjectDesc {
        GameObjectDesc::new(
            GameObjectId(id),
            vec![GameObjectPartDesc {
                mesh_desc: GameObjectMeshDesc {
                    mesh_file: mesh_file.to_string(),
                },
                ..Default::default()
            }],
        )
    }

    #[test]
    fn test_swap_and_drain() {
        let ctx = RenderSwapContext::new();
        assert!(!ctx.swap());

        ctx.add_dirty_game_object(object(1, "cube.obj"));
        ctx.add_delete_game_object(GameObjectId(2));
        assert!(ctx.swap());

        // render 侧未取走前，新的数据留在 logic 侧
        ctx.add_dirty_game_object(object(3, "cube.obj"));
        assert!(!ctx.swap());

        let data = ctx.take_render_swap_data();
        assert_eq!(data.game_object_deltas.len(), 2);
        assert_eq!(data.game_object_deltas[0].go_id(), GameObjectId(1));
        assert!(ctx.is_render_side_empty());

        assert!(ctx.swap());
        assert_eq!(ctx.take_render_swap_data().game_object_deltas.len(), 1);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut data = RenderSwapData::default();
        data.add_dirty_game_object(object(1, "a.obj"));
        data.add_dirty_game_object(object(2, "b.obj"));
        data.add_dirty_game_object(object(1, "c.obj"));
        assert_eq!(data.game_object_deltas.len(), 2);
        assert_eq!(
            data.game_object_deltas.back(),
            Some(&GameObjectDelta::Upsert(object(1, "c.obj")))
        );

        data.add_delete_game_object(GameObjectId(1));
        assert_eq!(data.game_object_deltas.len(), 2);
        assert_eq!(data.game_object_deltas.back(), Some(&GameObjectDelta::Remove(GameObjectId(1))));
    }

    #[test]
    fn test_invalid_deltas_dropped_at_swap() {
        let ctx = RenderSwapContext::new();
        ctx.add_dirty_game_object(object(1, ""));
        ctx.add_delete_game_object(GameObjectId::INVALID);
        ctx.add_dirty_game_object(object(2, "cube.obj"));
        assert!(ctx.swap());
        let data = ctx.take_render_swap_data();
        assert_eq!(data.game_object_deltas.len(), 1);
        assert_eq!(data.game_object_deltas[0].go_id(), GameObjectId(2));
    }

    #[test]
    fn test_camera_data_merges_fields() {
        let ctx = RenderSwapContext::new();
        ctx.set_camera_swap_data(CameraSwapData {
            fov_x: Some(60.0),
            ..Default::default()
        });
        ctx.set_camera_swap_data(CameraSwapData {
            camera_type: Some(RenderCameraType::Motor),
            ..Default::default()
        });
        assert!(ctx.swap());
        let camera = ctx.take_render_swap_data().camera_swap_data.unwrap();
        assert_eq!(camera.fov_x, Some(60.0));
        assert_eq!(camera.camera_type, Some(RenderCameraType::Motor));
    }

    /// 逻辑线程并发写入时，render 侧拿到的每个 game object 都是完整的
    #[test]
    fn test_concurrent_batches_are_atomic() {
        let ctx = Arc::new(RenderSwapContext::new());
        let writer = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    ctx.logic_update(|data| {
                        data.add_dirty_game_object(object(i, "a.obj"));
                        data.add_dirty_game_object(object(i + 10_000, "b.obj"));
                    });
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 1000 {
            if ctx.swap() {
                let data = ctx.take_render_swap_data();
                // 同一批中成对出现
                for delta in &data.game_object_deltas {
                    let id = delta.go_id().0;
                    let partner = if id >= 10_000 { id - 10_000 } else { id + 10_000 };
                    assert!(data.game_object_deltas.iter().any(|d| d.go_id().0 == partner));
                }
                received.extend(data.game_object_deltas);
            } else if writer.is_finished() && ctx.logic_update(|data| data.is_empty()) {
                break;
            }
        }
        writer.join().unwrap();
        ctx.swap();
        received.extend(ctx.take_render_swap_data().game_object_deltas);
        assert_eq!(received.len(), 1000);
    }
}
