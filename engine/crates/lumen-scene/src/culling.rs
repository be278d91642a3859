//! 可见性剔除
//!
//! 视锥体的 6 个平面直接从 proj * view 矩阵的行中得到，平面法线朝外。
//! 包围盒只要与视锥体相交或在其内部就保留。

use glam::{Mat4, Vec3, Vec4};
use lumen_render_interface::bounding_box::AxisAlignedBox;

use crate::camera::RenderCamera;
use crate::light::{DirectionalLight, PointLight};
use crate::render_entity::RenderEntity;

/// 6 个平面：right, left, top, bottom, near, far
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterFrustum {
    pub planes: [Vec4; 6],
}

impl ClusterFrustum {
    /// 法线长度为 0 的平面不剔除任何物体
    const DEGENERATE_PLANE: Vec4 = Vec4::new(0.0, 0.0, 0.0, -1.0);

    /// NDC 范围为 x: [x_left, x_right]，y: [y_top, y_bottom]，z: [z_near, z_far]
    pub fn from_matrix(mat: &Mat4, x_left: f32, x_right: f32, y_top: f32, y_bottom: f32, z_near: f32, z_far: f32) -> Self {
        debug_assert!(x_left < x_right);
        debug_assert!(y_top < y_bottom);
        debug_assert!(z_near < z_far);

        let row0 = mat.row(0);
        let row1 = mat.row(1);
        let row2 = mat.row(2);
        let row3 = mat.row(3);

        let planes = [
            row0 - row3 * x_right,
            row3 * x_left - row0,
            row3 * y_top - row1,
            row1 - row3 * y_bottom,
            row3 * z_near - row2,
            row2 - row3 * z_far,
        ];
        Self {
            planes: planes.map(Self::normalize_plane),
        }
    }

    /// Vulkan 的 NDC：x, y 属于 [-1, 1]，z 属于 [0, 1]
    #[inline]
    pub fn from_proj_view(proj_view: &Mat4) -> Self {
        Self::from_matrix(proj_view, -1.0, 1.0, -1.0, 1.0, 0.0, 1.0)
    }

    fn normalize_plane(plane: Vec4) -> Vec4 {
        let len = plane.truncate().length();
        if len.is_finite() && len > f32::EPSILON { plane / len } else { Self::DEGENERATE_PLANE }
    }

    /// 相交或在内部时返回 true；空包围盒视为可见
    pub fn intersects_box(&self, bbox: &AxisAlignedBox) -> bool {
        if bbox.is_empty() {
            return true;
        }
        let center = bbox.center().extend(1.0);
        let extents = bbox.half_extent();
        self.planes.iter().all(|plane| {
            let signed_distance = plane.dot(center);
            let radius = plane.truncate().abs().dot(extents);
            // NaN 的比较结果为 false，同样视为可见
            !(signed_distance >= radius)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

/// 逐轴比较球心到包围盒的距离
pub fn box_intersects_sphere(bbox: &AxisAlignedBox, sphere: &BoundingSphere) -> bool {
    if bbox.is_empty() {
        return true;
    }
    let (min, max) = (bbox.min_corner(), bbox.max_corner());
    (0..3).all(|i| {
        let c = sphere.center[i];
        if c < min[i] {
            !(min[i] - c > sphere.radius)
        } else if c > max[i] {
            !(c - max[i] > sphere.radius)
        } else {
            true
        }
    })
}

/// 变换 8 个角点后重新求轴对齐包围盒，只变换 min/max 在旋转时会低估范围
pub fn transform_bounding_box(bbox: &AxisAlignedBox, m: &Mat4) -> AxisAlignedBox {
    const BOX_OFFSETS: [Vec3; 8] = [
        Vec3::new(-1.0, -1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(-1.0, -1.0, -1.0),
        Vec3::new(1.0, -1.0, -1.0),
        Vec3::new(1.0, 1.0, -1.0),
        Vec3::new(-1.0, 1.0, -1.0),
    ];

    if bbox.is_empty() {
        return AxisAlignedBox::empty();
    }
    let center = bbox.center();
    let extents = bbox.half_extent();
    AxisAlignedBox::from_points(BOX_OFFSETS.iter().map(|offset| m.project_point3(extents * *offset + center)))
}

/// 为方向光拟合一个正交相机，覆盖相机视锥体与场景的交集
///
/// 近平面取场景的最近处，视锥体之外的物体也可以投射阴影。
pub fn calculate_directional_light_camera(
    entities: &[RenderEntity],
    light: &DirectionalLight,
    camera: &RenderCamera,
) -> Mat4 {
    let _span = tracy_client::span!("calculate_directional_light_camera");

    const FRUSTUM_POINTS_NDC: [Vec3; 8] = [
        Vec3::new(-1.0, -1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(-1.0, 1.0, 0.0),
    ];

    let inverse_proj_view = camera.proj_view_matrix().inverse();
    let frustum_bbox =
        AxisAlignedBox::from_points(FRUSTUM_POINTS_NDC.iter().map(|p| inverse_proj_view.project_point3(*p)));

    let scene_bbox = entities
        .iter()
        .map(|entity| transform_bounding_box(&entity.bounding_box, &entity.model_matrix))
        .fold(AxisAlignedBox::empty(), |acc, bbox| acc.union(&bbox));

    let direction = light.direction.normalize_or_zero();
    let direction = if direction == Vec3::ZERO { DirectionalLight::default().direction } else { direction };
    // 光线接近竖直时换一个 up，避免 look_at 退化
    let up = if direction.dot(Vec3::Z).abs() > 0.999 { Vec3::Y } else { Vec3::Z };

    let center = frustum_bbox.center();
    let eye = center + direction * frustum_bbox.half_extent().length();
    let light_view = Mat4::look_at_rh(eye, center, up);

    let frustum_light_view = transform_bounding_box(&frustum_bbox, &light_view);
    let scene_light_view = if scene_bbox.is_empty() {
        frustum_light_view
    } else {
        transform_bounding_box(&scene_bbox, &light_view)
    };

    let (f_min, f_max) = (frustum_light_view.min_corner(), frustum_light_view.max_corner());
    let (s_min, s_max) = (scene_light_view.min_corner(), scene_light_view.max_corner());
    let mut left = f_min.x.max(s_min.x);
    let mut right = f_max.x.min(s_max.x);
    let mut bottom = f_min.y.max(s_min.y);
    let mut top = f_max.y.min(s_max.y);
    let mut near = -s_max.z;
    let mut far = -f_min.z.max(s_min.z);

    if !(left < right && bottom < top && near < far) {
        log::debug!("scene does not overlap the camera frustum, fit the directional light to the frustum only");
        left = f_min.x;
        right = f_max.x;
        bottom = f_min.y;
        top = f_max.y;
        near = -f_max.z;
        far = -f_min.z;
    }

    let light_proj = Mat4::orthographic_rh(left, right, bottom, top, near, far);
    light_proj * light_view
}

/// 对一组实体做剔除，结果是实体在列表中的下标
pub struct VisibilityCuller;

impl VisibilityCuller {
    /// 主相机与方向光共用的视锥体剔除
    pub fn cull_frustum(entities: &[RenderEntity], proj_view: &Mat4) -> Vec<usize> {
        let frustum = ClusterFrustum::from_proj_view(proj_view);
        entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| {
                frustum.intersects_box(&transform_bounding_box(&entity.bounding_box, &entity.model_matrix))
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// 实体必须与所有点光源的影响范围都相交
    pub fn cull_point_lights(entities: &[RenderEntity], point_lights: &[PointLight]) -> Vec<usize> {
        let spheres = point_lights
            .iter()
            .map(|light| BoundingSphere {
                center: light.position,
                radius: light.calculate_radius(),
            })
            .collect::<Vec<_>>();

        entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| {
                let world_bbox = transform_bounding_box(&entity.bounding_box, &entity.model_matrix);
                spheres.iter().all(|sphere| box_intersects_sphere(&world_bbox, sphere))
            })
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_entity(instance_id: usize, center: Vec3) -> RenderEntity {
        RenderEntity {
            instance_id,
            model_matrix: Mat4::from_translation(center),
            bounding_box: AxisAlignedBox::new(Vec3::ZERO, Vec3::ONE),
            ..Default::default()
        }
    }

    fn test_camera() -> RenderCamera {
        let mut camera = RenderCamera::new();
        camera.set_fov_x(60.0);
        camera.set_aspect(1.0);
        camera.set_z_near_far(0.1, 100.0);
        camera.look_at(Vec3::new(-10.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        camera
    }

    #[test]
    fn test_transform_uses_all_corners() {
        let bbox = AxisAlignedBox::new(Vec3::ZERO, Vec3::ONE);
        let rotated = transform_bounding_box(&bbox, &Mat4::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let expected = 2.0f32.sqrt();
        assert!((rotated.max_corner().x - expected).abs() < 1e-5);
        assert!((rotated.min_corner().y + expected).abs() < 1e-5);
        assert!(transform_bounding_box(&AxisAlignedBox::empty(), &Mat4::IDENTITY).is_empty());
    }

    #[test]
    fn test_frustum_keeps_inside_and_rejects_outside() {
        let camera = test_camera();
        let entities = vec![
            cube_entity(1, Vec3::ZERO),
            // 相机后方
            cube_entity(2, Vec3::new(-30.0, 0.0, 0.0)),
            // 远平面之外
            cube_entity(3, Vec3::new(200.0, 0.0, 0.0)),
            // 侧面之外
            cube_entity(4, Vec3::new(0.0, 50.0, 0.0)),
            // 与右侧平面相交
            cube_entity(5, Vec3::new(0.0, -(10.0 * (30.0f32).to_radians().tan()), 0.0)),
        ];
        let visible = VisibilityCuller::cull_frustum(&entities, &camera.proj_view_matrix());
        assert_eq!(visible, vec![0, 4]);
    }

    #[test]
    fn test_empty_box_is_visible() {
        let frustum = ClusterFrustum::from_proj_view(&test_camera().proj_view_matrix());
        assert!(frustum.intersects_box(&AxisAlignedBox::empty()));

        // 退化的矩阵不剔除任何物体
        let degenerate = ClusterFrustum::from_proj_view(&Mat4::ZERO);
        assert!(degenerate.intersects_box(&AxisAlignedBox::new(Vec3::splat(1000.0), Vec3::ONE)));
    }

    #[test]
    fn test_point_light_culls_far_entity() {
        let light = PointLight {
            position: Vec3::ZERO,
            flux: Vec3::splat(1000.0),
        };
        let entities = vec![cube_entity(1, Vec3::new(100.0, 0.0, 0.0)), cube_entity(2, Vec3::new(3.0, 0.0, 0.0))];
        let visible = VisibilityCuller::cull_point_lights(&entities, &[light]);
        assert_eq!(visible, vec![1]);

        // 需要与所有点光源相交
        let far_light = PointLight {
            position: Vec3::new(-50.0, 0.0, 0.0),
            flux: Vec3::splat(1000.0),
        };
        assert!(VisibilityCuller::cull_point_lights(&entities, &[light, far_light]).is_empty());

        // 没有点光源时全部可见
        assert_eq!(VisibilityCuller::cull_point_lights(&entities, &[]).len(), 2);
    }

    #[test]
    fn test_box_sphere_per_axis() {
        let bbox = AxisAlignedBox::new(Vec3::ZERO, Vec3::ONE);
        let touching = BoundingSphere {
            center: Vec3::new(3.0, 0.0, 0.0),
            radius: 2.0,
        };
        assert!(box_intersects_sphere(&bbox, &touching));
        let apart = BoundingSphere {
            center: Vec3::new(0.0, 0.0, -4.0),
            radius: 2.0,
        };
        assert!(!box_intersects_sphere(&bbox, &apart));
    }

    #[test]
    fn test_directional_light_sees_entity_inside_frustum() {
        let camera = test_camera();
        let light = DirectionalLight {
            direction: Vec3::new(-1.0, -1.0, -1.0).normalize(),
            color: Vec3::ONE,
        };
        let entities = vec![cube_entity(1, Vec3::ZERO)];
        let light_proj_view = calculate_directional_light_camera(&entities, &light, &camera);
        assert!(light_proj_view.is_finite());
        let visible = VisibilityCuller::cull_frustum(&entities, &light_proj_view);
        assert_eq!(visible, vec![0]);
    }

    #[test]
    fn test_directional_light_with_empty_scene_and_vertical_light() {
        let camera = test_camera();
        let light = DirectionalLight {
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
        };
        let light_proj_view = calculate_directional_light_camera(&[], &light, &camera);
        assert!(light_proj_view.is_finite());
    }
}
