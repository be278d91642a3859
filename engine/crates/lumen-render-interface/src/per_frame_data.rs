//! 与着色器共享内存布局的数据结构
//!
//! 按照 std140/std430 的规则手动补齐 padding，所有结构都可以直接 `bytemuck::bytes_of` 写入 ring buffer。

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::render_settings::DefaultRendererSettings;

pub const MAX_POINT_LIGHT_COUNT: usize = DefaultRendererSettings::MAX_POINT_LIGHT_COUNT;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct VulkanScenePointLight {
    pub position: Vec3,
    pub radius: f32,
    pub intensity: Vec3,
    pub _padding_intensity: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct VulkanSceneDirectionalLight {
    pub direction: Vec3,
    pub _padding_direction: f32,
    pub color: Vec3,
    pub _padding_color: f32,
}

/// 主相机 pass 的 per-frame 数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshPerframeStorageBufferObject {
    pub proj_view_matrix: Mat4,
    pub camera_position: Vec3,
    pub _padding_camera_position: f32,
    pub ambient_light: Vec3,
    pub _padding_ambient_light: f32,
    pub point_light_num: u32,
    pub _padding_point_light_num: [u32; 3],
    pub scene_point_lights: [VulkanScenePointLight; MAX_POINT_LIGHT_COUNT],
    pub scene_directional_light: VulkanSceneDirectionalLight,
    pub directional_light_proj_view: Mat4,
}
impl Default for MeshPerframeStorageBufferObject {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// 每个实例的数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct VulkanMeshInstance {
    pub enable_vertex_blending: f32,
    pub _padding_enable_vertex_blending: [f32; 3],
    pub model_matrix: Mat4,
}

/// 每个材质的 uniform 数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshPerMaterialUniformBufferObject {
    pub base_color_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive_factor: Vec3,
    pub is_blend: u32,
    pub is_double_sided: u32,
    pub _padding_is_double_sided: [u32; 3],
}
impl Default for MeshPerMaterialUniformBufferObject {
    fn default() -> Self {
        Self {
            base_color_factor: Vec4::ONE,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            emissive_factor: Vec3::ONE,
            is_blend: 0,
            is_double_sided: 0,
            _padding_is_double_sided: [0; 3],
        }
    }
}

/// 点光源阴影 pass 的 per-frame 数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshPointLightShadowPerframeStorageBufferObject {
    pub point_light_num: u32,
    pub _padding_point_light_num: [u32; 3],
    /// xyz: position, w: radius
    pub point_lights_position_and_radius: [Vec4; MAX_POINT_LIGHT_COUNT],
}
impl Default for MeshPointLightShadowPerframeStorageBufferObject {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// 平行光阴影 pass 的 per-frame 数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct MeshDirectionalLightShadowPerframeStorageBufferObject {
    pub light_proj_view: Mat4,
}

/// 拾取 pass 的 per-frame 数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct MeshPickPerframeStorageBufferObject {
    pub proj_view_matrix: Mat4,
    pub rt_width: u32,
    pub rt_height: u32,
    pub _padding_rt: [u32; 2],
}

/// 拾取 pass 的实例数据，node_id 即 instance id
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct VulkanPickMeshInstance {
    pub model_matrix: Mat4,
    pub node_id: u32,
    pub enable_vertex_blending: f32,
    pub _padding: [u32; 2],
}

/// 编辑器坐标轴
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct AxisStorageBufferObject {
    pub model_matrix: Mat4,
    /// 0/1/2 表示 x/y/z 被选中，3 表示没有选中
    pub selected_axis: u32,
    pub _padding_selected_axis: [u32; 3],
}
impl Default for AxisStorageBufferObject {
    fn default() -> Self {
        Self {
            model_matrix: Mat4::IDENTITY,
            selected_axis: 3,
            _padding_selected_axis: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(size_of::<VulkanScenePointLight>(), 32);
        assert_eq!(size_of::<MeshPerframeStorageBufferObject>(), 64 + 16 * 3 + 32 * 15 + 32 + 64);
        assert_eq!(size_of::<VulkanMeshInstance>(), 80);
        assert_eq!(size_of::<MeshPerMaterialUniformBufferObject>(), 64);
        assert_eq!(size_of::<MeshPointLightShadowPerframeStorageBufferObject>(), 16 + 16 * 15);
        assert_eq!(size_of::<MeshPickPerframeStorageBufferObject>(), 80);
        assert_eq!(size_of::<AxisStorageBufferObject>(), 80);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(AxisStorageBufferObject::default().selected_axis, 3);
        let perframe = MeshPerframeStorageBufferObject::default();
        assert_eq!(perframe.point_light_num, 0);
        assert_eq!(bytemuck::bytes_of(&perframe).len(), size_of::<MeshPerframeStorageBufferObject>());
    }
}
