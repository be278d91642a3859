use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Editor: 由相机自身的位置与朝向得到 view 矩阵；Motor: 直接使用逻辑线程给出的 view 矩阵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderCameraType {
    #[default]
    Editor,
    Motor,
}

/// 渲染使用的相机
///
/// 相机空间中 X 向右，Y 向前，Z 向上；world 空间以 Z 为 up。
#[derive(Debug, Clone)]
pub struct RenderCamera {
    camera_type: RenderCameraType,

    position: Vec3,
    /// world -> camera
    rotation: Quat,
    /// camera -> world
    inv_rotation: Quat,

    z_near: f32,
    z_far: f32,
    up_axis: Vec3,

    main_view_matrix: Mat4,

    aspect: f32,
    /// 单位：角度
    fov_x: f32,
    fov_y: f32,
}

impl Default for RenderCamera {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl RenderCamera {
    pub const X: Vec3 = Vec3::X;
    pub const Y: Vec3 = Vec3::Y;
    pub const Z: Vec3 = Vec3::Z;

    pub const MIN_FOV: f32 = 10.0;
    pub const MAX_FOV: f32 = 89.0;

    /// rotate 时俯仰角的极限，forward 与 up 的夹角余弦
    const PITCH_LIMIT: f32 = 0.99;

    pub fn new() -> Self {
        let mut camera = Self {
            camera_type: RenderCameraType::Editor,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            inv_rotation: Quat::IDENTITY,
            z_near: 0.1,
            z_far: 1000.0,
            up_axis: Self::Z,
            main_view_matrix: Mat4::IDENTITY,
            aspect: 1.0,
            fov_x: Self::MAX_FOV,
            fov_y: Self::MAX_FOV,
        };
        camera.set_aspect(1280.0 / 768.0);
        camera
    }
}

// getters
impl RenderCamera {
    #[inline]
    pub fn camera_type(&self) -> RenderCameraType {
        self.camera_type
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.inv_rotation * Self::Y
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.inv_rotation * Self::Z
    }

    #[inline]
    pub fn right(&self) -> Vec3 {
        self.inv_rotation * Self::X
    }

    /// (fov_x, fov_y)，单位：角度
    #[inline]
    pub fn fov(&self) -> Vec2 {
        Vec2::new(self.fov_x, self.fov_y)
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    #[inline]
    pub fn z_near(&self) -> f32 {
        self.z_near
    }

    #[inline]
    pub fn z_far(&self) -> f32 {
        self.z_far
    }

    pub fn look_at_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), self.up())
    }

    pub fn view_matrix(&self) -> Mat4 {
        match self.camera_type {
            RenderCameraType::Editor => self.look_at_matrix(),
            RenderCameraType::Motor => self.main_view_matrix,
        }
    }

    /// 透视投影，深度范围 [0, 1]，并翻转 Y 以适配 Vulkan 的 NDC
    pub fn pers_proj_matrix(&self) -> Mat4 {
        let fix_mat = Mat4::from_diagonal(Vec4::new(1.0, -1.0, 1.0, 1.0));
        fix_mat * Mat4::perspective_rh(self.fov_y.to_radians(), self.aspect, self.z_near, self.z_far)
    }

    #[inline]
    pub fn proj_view_matrix(&self) -> Mat4 {
        self.pers_proj_matrix() * self.view_matrix()
    }
}

// update
impl RenderCamera {
    #[inline]
    pub fn set_current_camera_type(&mut self, camera_type: RenderCameraType) {
        self.camera_type = camera_type;
    }

    /// 同时从 view 矩阵中恢复相机位置
    pub fn set_main_view_matrix(&mut self, view_matrix: Mat4, camera_type: RenderCameraType) {
        self.camera_type = camera_type;
        self.main_view_matrix = view_matrix;

        let rotation = Mat3::from_mat4(view_matrix);
        self.position = -(rotation.transpose() * view_matrix.w_axis.truncate());
    }

    pub fn move_by(&mut self, delta: Vec3) {
        self.position += delta;
    }

    /// delta.x 为俯仰角，delta.y 为偏航角，单位：角度
    pub fn rotate(&mut self, delta: Vec2) {
        let mut delta = Vec2::new(delta.x.to_radians(), delta.y.to_radians());

        // 接近正上方或正下方时不再继续俯仰
        let dot = self.up_axis.dot(self.forward());
        if (dot < -Self::PITCH_LIMIT && delta.x > 0.0) || (dot > Self::PITCH_LIMIT && delta.x < 0.0) {
            delta.x = 0.0;
        }

        // pitch 相对于相机自身，yaw 相对于 world，避免产生 roll
        let pitch = Quat::from_axis_angle(Self::X, delta.x);
        let yaw = Quat::from_axis_angle(Self::Z, delta.y);
        self.rotation = (pitch * self.rotation * yaw).normalize();
        self.inv_rotation = self.rotation.conjugate();
    }

    /// offset > 0 表示拉近，fov_x 减小
    pub fn zoom(&mut self, offset: f32) {
        self.set_fov_x(self.fov_x - offset);
    }

    pub fn set_fov_x(&mut self, fov_x: f32) {
        self.fov_x = fov_x.clamp(Self::MIN_FOV, Self::MAX_FOV);
        self.update_fov_y();
    }

    pub fn look_at(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.position = position;

        let forward = (target - position).normalize_or_zero();
        if forward == Vec3::ZERO {
            log::warn!("camera look_at with position == target, keep rotation");
            return;
        }
        self.rotation = Quat::from_rotation_arc(forward, Self::Y);

        // 修正 up，使其与 forward 正交
        let right = forward.cross(up.normalize()).normalize();
        let orth_up = right.cross(forward);
        let up_rotation = Quat::from_rotation_arc((self.rotation * orth_up).normalize(), Self::Z);

        self.rotation = (up_rotation * self.rotation).normalize();
        self.inv_rotation = self.rotation.conjugate();
    }

    /// 1 / tan(fovy / 2) = aspect / tan(fovx / 2)
    pub fn set_aspect(&mut self, aspect: f32) {
        if !(aspect.is_finite() && aspect > 0.0) {
            log::warn!("ignore invalid camera aspect: {}", aspect);
            return;
        }
        self.aspect = aspect;
        self.update_fov_y();
    }

    pub fn set_z_near_far(&mut self, z_near: f32, z_far: f32) {
        self.z_near = z_near;
        self.z_far = z_far;
    }

    fn update_fov_y(&mut self) {
        self.fov_y = ((self.fov_x * 0.5).to_radians().tan() / self.aspect).atan().to_degrees() * 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_look_at_basis() {
        let mut camera = RenderCamera::new();
        camera.look_at(Vec3::new(-5.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        assert!(approx(camera.forward(), Vec3::X));
        assert!(approx(camera.up(), Vec3::Z));
        assert!(approx(camera.right(), Vec3::NEG_Y));

        // 相机前方的点在 view space 中位于 -Z
        let p = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!(approx(p, Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn test_set_main_view_matrix_recovers_position() {
        let mut camera = RenderCamera::new();
        let eye = Vec3::new(3.0, -2.0, 7.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 1.0, 0.0), Vec3::Z);
        camera.set_main_view_matrix(view, RenderCameraType::Motor);
        assert!(approx(camera.position(), eye));
        assert_eq!(camera.view_matrix(), view);
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut camera = RenderCamera::new();
        camera.zoom(200.0);
        assert_eq!(camera.fov().x, RenderCamera::MIN_FOV);
        camera.zoom(-200.0);
        assert_eq!(camera.fov().x, RenderCamera::MAX_FOV);
    }

    #[test]
    fn test_aspect_updates_fov_y() {
        let mut camera = RenderCamera::new();
        camera.set_fov_x(60.0);
        camera.set_aspect(1.0);
        assert!((camera.fov().y - 60.0).abs() < 1e-3);
        camera.set_aspect(2.0);
        assert!(camera.fov().y < 60.0);
        camera.set_aspect(0.0);
        assert_eq!(camera.aspect(), 2.0);
    }

    #[test]
    fn test_rotate_stops_near_pole() {
        let mut camera = RenderCamera::new();
        camera.look_at(Vec3::ZERO, Vec3::new(0.01, 0.0, 1.0), Vec3::X);
        let before = camera.forward();
        // forward 已接近 up，继续向上俯仰被忽略
        camera.rotate(Vec2::new(-10.0, 0.0));
        assert!(approx(camera.forward(), before));
    }

    #[test]
    fn test_projection_flips_y() {
        let mut camera = RenderCamera::new();
        camera.look_at(Vec3::new(-5.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        let clip = camera.proj_view_matrix() * Vec4::new(0.0, 0.0, 1.0, 1.0);
        // world 空间上方的点在 Vulkan NDC 中 y < 0
        assert!(clip.y / clip.w < 0.0);
    }
}
