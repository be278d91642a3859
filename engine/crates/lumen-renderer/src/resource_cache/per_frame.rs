use ash::vk;
use glam::{Mat4, Vec3};
use lumen_render_interface::per_frame_data::{
    AxisStorageBufferObject, MAX_POINT_LIGHT_COUNT, MeshDirectionalLightShadowPerframeStorageBufferObject,
    MeshPerframeStorageBufferObject, MeshPickPerframeStorageBufferObject,
    MeshPointLightShadowPerframeStorageBufferObject, VulkanMeshInstance, VulkanPickMeshInstance,
    VulkanSceneDirectionalLight, VulkanScenePointLight,
};
use lumen_render_interface::render_settings::DefaultRendererSettings;
use lumen_scene::{camera::RenderCamera, render_scene::RenderScene};

/// per-frame 数据在 ring buffer 中的绑定范围，取各个 per-frame 结构中最大的一个
pub const PER_FRAME_BLOCK_RANGE: u64 = size_of::<MeshPerframeStorageBufferObject>() as u64;
/// 一个 draw call 的实例数组
pub const INSTANCE_BLOCK_RANGE: u64 =
    (DefaultRendererSettings::MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT * size_of::<VulkanMeshInstance>()) as u64;
/// 一个 draw call 的骨骼矩阵
pub const JOINT_MATRICES_RANGE: u64 =
    (DefaultRendererSettings::MESH_VERTEX_BLENDING_MAX_JOINT_COUNT * size_of::<Mat4>()) as u64;

const _: () = assert!(size_of::<MeshPointLightShadowPerframeStorageBufferObject>() as u64 <= PER_FRAME_BLOCK_RANGE);
const _: () =
    assert!(size_of::<MeshDirectionalLightShadowPerframeStorageBufferObject>() as u64 <= PER_FRAME_BLOCK_RANGE);
const _: () = assert!(size_of::<MeshPickPerframeStorageBufferObject>() as u64 <= PER_FRAME_BLOCK_RANGE);
const _: () = assert!(size_of::<AxisStorageBufferObject>() as u64 <= INSTANCE_BLOCK_RANGE);
const _: () = assert!(size_of::<VulkanPickMeshInstance>() == size_of::<VulkanMeshInstance>());

/// 每帧写入 ring buffer 的数据在 CPU 端的副本
#[derive(Clone, Copy, Default)]
pub struct PerFrameData {
    pub mesh: MeshPerframeStorageBufferObject,
    pub point_light_shadow: MeshPointLightShadowPerframeStorageBufferObject,
    pub directional_light_shadow: MeshDirectionalLightShadowPerframeStorageBufferObject,
    pub pick: MeshPickPerframeStorageBufferObject,
}

// update
impl PerFrameData {
    /// 由场景与相机更新本帧的数据，超出上限的点光源被忽略
    pub fn update(&mut self, scene: &RenderScene, camera: &RenderCamera, render_target_extent: vk::Extent2D) {
        let _span = tracy_client::span!("PerFrameData::update");
        let proj_view = camera.proj_view_matrix();

        let point_light_num = scene.point_lights.len().min(MAX_POINT_LIGHT_COUNT);
        if scene.point_lights.len() > MAX_POINT_LIGHT_COUNT {
            log::debug!(
                "{} point lights in scene, only the first {} are rendered",
                scene.point_lights.len(),
                MAX_POINT_LIGHT_COUNT
            );
        }

        self.mesh.proj_view_matrix = proj_view;
        self.mesh.camera_position = camera.position();
        self.mesh.ambient_light = scene.ambient_light.irradiance;
        self.mesh.point_light_num = point_light_num as u32;
        self.point_light_shadow.point_light_num = point_light_num as u32;

        self.mesh.scene_point_lights = [VulkanScenePointLight::default(); MAX_POINT_LIGHT_COUNT];
        self.point_light_shadow.point_lights_position_and_radius = Default::default();
        for (index, light) in scene.point_lights.iter().take(point_light_num).enumerate() {
            let radius = light.calculate_radius();
            self.mesh.scene_point_lights[index] = VulkanScenePointLight {
                position: light.position,
                radius,
                intensity: light.intensity(),
                _padding_intensity: 0.0,
            };
            self.point_light_shadow.point_lights_position_and_radius[index] = light.position.extend(radius);
        }

        self.mesh.scene_directional_light = VulkanSceneDirectionalLight {
            direction: scene.directional_light.direction.normalize_or_zero(),
            _padding_direction: 0.0,
            color: scene.directional_light.color,
            _padding_color: 0.0,
        };

        self.pick.proj_view_matrix = proj_view;
        self.pick.rt_width = render_target_extent.width;
        self.pick.rt_height = render_target_extent.height;
    }

    /// 方向光的 proj view 在剔除时才确定
    pub fn update_directional_light_proj_view(&mut self, proj_view: Mat4) {
        self.mesh.directional_light_proj_view = proj_view;
        self.directional_light_shadow.light_proj_view = proj_view;
    }

    #[inline]
    pub fn camera_position(&self) -> Vec3 {
        self.mesh.camera_position
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;
    use lumen_scene::light::PointLight;

    use super::*;

    #[test]
    fn test_point_lights_are_clamped_and_packed() {
        let mut scene = RenderScene::new();
        scene.directional_light.direction = Vec3::new(0.0, 0.0, -2.0);
        for i in 0..(MAX_POINT_LIGHT_COUNT + 3) {
            scene.point_lights.push(PointLight {
                position: Vec3::new(i as f32, 0.0, 0.0),
                flux: Vec3::splat(4.0 * std::f32::consts::PI * 100.0),
            });
        }

        let mut data = PerFrameData::default();
        data.update(
            &scene,
            &RenderCamera::new(),
            vk::Extent2D {
                width: 64,
                height: 32,
            },
        );

        assert_eq!(data.mesh.point_light_num, MAX_POINT_LIGHT_COUNT as u32);
        assert_eq!(data.point_light_shadow.point_light_num, MAX_POINT_LIGHT_COUNT as u32);
        let light = data.mesh.scene_point_lights[2];
        assert_eq!(light.position, Vec3::new(2.0, 0.0, 0.0));
        assert!((light.intensity.x - 100.0).abs() < 1e-3);
        assert_eq!(data.point_light_shadow.point_lights_position_and_radius[2], Vec4::new(2.0, 0.0, 0.0, light.radius));
        assert_eq!(data.mesh.scene_directional_light.direction, Vec3::NEG_Z);
        assert_eq!((data.pick.rt_width, data.pick.rt_height), (64, 32));
    }

    #[test]
    fn test_directional_light_proj_view() {
        let mut data = PerFrameData::default();
        let m = Mat4::from_scale(Vec3::splat(2.0));
        data.update_directional_light_proj_view(m);
        assert_eq!(data.mesh.directional_light_proj_view, m);
        assert_eq!(data.directional_light_shadow.light_proj_view, m);
    }
}
