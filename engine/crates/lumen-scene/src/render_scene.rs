use std::collections::HashMap;

use glam::Mat4;
use lumen_render_interface::guid_allocator::GuidAllocator;

use crate::camera::RenderCamera;
use crate::culling::{VisibilityCuller, calculate_directional_light_camera};
use crate::game_object::{GameObjectId, GameObjectPartId};
use crate::light::{AmbientLight, DirectionalLight, PointLight};
use crate::render_entity::{RenderEntity, RenderMeshNode};

/// 渲染线程上的场景
///
/// 可见列表只是缓存，每帧由 [`RenderScene::update_visible_objects`] 重建。
#[derive(Default)]
pub struct RenderScene {
    pub ambient_light: AmbientLight,
    pub directional_light: DirectionalLight,
    /// 只由调用方填充，关卡与 swap data 都不提供点光源，默认为空
    pub point_lights: Vec<PointLight>,

    render_entities: Vec<RenderEntity>,
    /// 编辑器中的坐标轴
    render_axis: Option<RenderEntity>,

    instance_id_allocator: GuidAllocator<GameObjectPartId>,
    mesh_object_id_map: HashMap<usize, GameObjectId>,

    directional_light_proj_view: Mat4,
    directional_light_visible_nodes: Vec<usize>,
    point_lights_visible_nodes: Vec<usize>,
    main_camera_visible_nodes: Vec<usize>,
}

// new & init
impl RenderScene {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl RenderScene {
    #[inline]
    pub fn render_entities(&self) -> &[RenderEntity] {
        &self.render_entities
    }

    #[inline]
    pub fn render_axis(&self) -> Option<&RenderEntity> {
        self.render_axis.as_ref()
    }

    #[inline]
    pub fn instance_id_allocator(&self) -> &GuidAllocator<GameObjectPartId> {
        &self.instance_id_allocator
    }

    #[inline]
    pub fn instance_id_allocator_mut(&mut self) -> &mut GuidAllocator<GameObjectPartId> {
        &mut self.instance_id_allocator
    }

    /// 由最近一次 [`RenderScene::update_visible_objects`] 计算
    #[inline]
    pub fn directional_light_proj_view(&self) -> Mat4 {
        self.directional_light_proj_view
    }

    pub fn directional_light_visible_nodes(&self) -> impl Iterator<Item = RenderMeshNode<'_>> + '_ {
        self.nodes_of(&self.directional_light_visible_nodes)
    }

    pub fn point_lights_visible_nodes(&self) -> impl Iterator<Item = RenderMeshNode<'_>> + '_ {
        self.nodes_of(&self.point_lights_visible_nodes)
    }

    pub fn main_camera_visible_nodes(&self) -> impl Iterator<Item = RenderMeshNode<'_>> + '_ {
        self.nodes_of(&self.main_camera_visible_nodes)
    }

    pub fn axis_node(&self) -> Option<RenderMeshNode<'_>> {
        self.render_axis.as_ref().map(RenderMeshNode::from_entity)
    }

    pub fn get_game_object_id_by_instance_id(&self, instance_id: usize) -> GameObjectId {
        self.mesh_object_id_map.get(&instance_id).copied().unwrap_or(GameObjectId::INVALID)
    }

    fn nodes_of<'a>(&'a self, indices: &'a [usize]) -> impl Iterator<Item = RenderMeshNode<'a>> + 'a {
        indices.iter().filter_map(|index| self.render_entities.get(*index)).map(RenderMeshNode::from_entity)
    }
}

// update
impl RenderScene {
    /// 相同 instance id 的实体直接替换
    pub fn add_or_update_entity(&mut self, entity: RenderEntity) {
        match self.render_entities.iter_mut().find(|e| e.instance_id == entity.instance_id) {
            Some(existing) => *existing = entity,
            None => self.render_entities.push(entity),
        }
    }

    pub fn add_instance_id_to_map(&mut self, instance_id: usize, go_id: GameObjectId) {
        self.mesh_object_id_map.insert(instance_id, go_id);
    }

    /// 删除 game object 的所有 part，并回收它们的 instance id
    pub fn delete_entity_by_game_object_id(&mut self, go_id: GameObjectId) {
        let instance_ids = self
            .mesh_object_id_map
            .iter()
            .filter(|(_, id)| **id == go_id)
            .map(|(instance_id, _)| *instance_id)
            .collect::<Vec<_>>();

        for instance_id in &instance_ids {
            self.mesh_object_id_map.remove(instance_id);
            self.instance_id_allocator.free_guid(*instance_id);
        }
        self.render_entities.retain(|entity| !instance_ids.contains(&entity.instance_id));

        log::debug!("delete {}: {} entities", go_id, instance_ids.len());
    }

    pub fn clear_for_level_reloading(&mut self) {
        self.instance_id_allocator.clear();
        self.mesh_object_id_map.clear();
        self.render_entities.clear();
        self.clear_visible_nodes();
    }

    pub fn set_render_axis(&mut self, axis: Option<RenderEntity>) {
        self.render_axis = axis;
    }

    /// 重建所有视图的可见列表，并更新方向光的 proj * view
    pub fn update_visible_objects(&mut self, camera: &RenderCamera) {
        let _span = tracy_client::span!("RenderScene::update_visible_objects");

        self.directional_light_proj_view =
            calculate_directional_light_camera(&self.render_entities, &self.directional_light, camera);
        self.directional_light_visible_nodes =
            VisibilityCuller::cull_frustum(&self.render_entities, &self.directional_light_proj_view);
        self.point_lights_visible_nodes = VisibilityCuller::cull_point_lights(&self.render_entities, &self.point_lights);
        self.main_camera_visible_nodes =
            VisibilityCuller::cull_frustum(&self.render_entities, &camera.proj_view_matrix());
    }

    fn clear_visible_nodes(&mut self) {
        self.directional_light_visible_nodes.clear();
        self.point_lights_visible_nodes.clear();
        self.main_camera_visible_nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use lumen_render_interface::bounding_box::AxisAlignedBox;

    use super::*;

    fn add_part(scene: &mut RenderScene, go_id: GameObjectId, part_id: usize, center: Vec3) -> usize {
        let instance_id = scene.instance_id_allocator_mut().alloc_guid(&GameObjectPartId { go_id, part_id });
        scene.add_instance_id_to_map(instance_id, go_id);
        scene.add_or_update_entity(RenderEntity {
            instance_id,
            model_matrix: Mat4::from_translation(center),
            bounding_box: AxisAlignedBox::new(Vec3::ZERO, Vec3::ONE),
            ..Default::default()
        });
        instance_id
    }

    #[test]
    fn test_update_replaces_entity_with_same_instance_id() {
        let mut scene = RenderScene::new();
        let id = add_part(&mut scene, GameObjectId(7), 0, Vec3::ZERO);
        let again = add_part(&mut scene, GameObjectId(7), 0, Vec3::X);
        assert_eq!(id, again);
        assert_eq!(scene.render_entities().len(), 1);
        assert_eq!(scene.render_entities()[0].model_matrix, Mat4::from_translation(Vec3::X));
        assert_eq!(scene.get_game_object_id_by_instance_id(id), GameObjectId(7));
    }

    #[test]
    fn test_delete_removes_all_parts() {
        let mut scene = RenderScene::new();
        add_part(&mut scene, GameObjectId(1), 0, Vec3::ZERO);
        let p1 = add_part(&mut scene, GameObjectId(1), 1, Vec3::ZERO);
        let other = add_part(&mut scene, GameObjectId(2), 0, Vec3::ZERO);

        scene.delete_entity_by_game_object_id(GameObjectId(1));
        assert_eq!(scene.render_entities().len(), 1);
        assert_eq!(scene.render_entities()[0].instance_id, other);
        assert!(!scene.get_game_object_id_by_instance_id(p1).is_valid());
        assert_eq!(scene.instance_id_allocator().len(), 1);
    }

    #[test]
    fn test_point_lights_are_empty_until_caller_fills_them() {
        let mut scene = RenderScene::new();
        add_part(&mut scene, GameObjectId(1), 0, Vec3::ZERO);

        let mut camera = RenderCamera::new();
        camera.look_at(Vec3::new(-10.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        scene.update_visible_objects(&camera);

        assert!(scene.point_lights.is_empty());
        assert_eq!(scene.point_lights_visible_nodes().count(), 0);
        assert_eq!(scene.main_camera_visible_nodes().count(), 1);
    }

    #[test]
    fn test_visible_lists_per_view() {
        let mut scene = RenderScene::new();
        scene.point_lights.push(PointLight {
            position: Vec3::ZERO,
            flux: Vec3::splat(1000.0),
        });
        add_part(&mut scene, GameObjectId(1), 0, Vec3::ZERO);
        add_part(&mut scene, GameObjectId(2), 0, Vec3::new(100.0, 0.0, 0.0));

        let mut camera = RenderCamera::new();
        camera.look_at(Vec3::new(-10.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        scene.update_visible_objects(&camera);

        assert_eq!(scene.main_camera_visible_nodes().count(), 2);
        assert_eq!(scene.point_lights_visible_nodes().map(|n| n.node_id).collect::<Vec<_>>(), vec![1]);
        assert!(scene.directional_light_visible_nodes().count() >= 1);

        scene.clear_for_level_reloading();
        assert_eq!(scene.main_camera_visible_nodes().count(), 0);
        assert!(scene.instance_id_allocator().is_empty());
    }
}
