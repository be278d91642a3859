use glam::Vec3;

/// 点光源，亮度由辐射通量描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// radiant flux，单位 W
    pub flux: Vec3,
}

impl PointLight {
    const INTENSITY_CUTOFF: f32 = 1.0;
    const ATTENUATION_CUTOFF: f32 = 0.05;

    /// radiant intensity，单位 W/sr
    #[inline]
    pub fn intensity(&self) -> Vec3 {
        self.flux / (4.0 * std::f32::consts::PI)
    }

    /// 用于剔除的影响半径：衰减后强度降到 1 W/m^2 的距离
    ///
    /// 强度不为正时无法得到有限的半径，返回 `f32::INFINITY`，剔除时视为全部可见。
    pub fn calculate_radius(&self) -> f32 {
        let max_intensity = self.intensity().max_element();
        if max_intensity.is_nan() || max_intensity <= 0.0 {
            return f32::INFINITY;
        }
        let attenuation = Self::INTENSITY_CUTOFF.max(Self::ATTENUATION_CUTOFF * max_intensity) / max_intensity;
        1.0 / attenuation.sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmbientLight {
    pub irradiance: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// 光线的传播方向
    pub direction: Vec3,
    pub color: Vec3,
}
impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-1.0, -1.0, -1.0).normalize(),
            color: Vec3::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_grows_with_flux_until_cutoff() {
        let dim = PointLight {
            position: Vec3::ZERO,
            flux: Vec3::splat(4.0 * std::f32::consts::PI),
        };
        // intensity 1 -> attenuation 1 -> radius 1
        assert!((dim.calculate_radius() - 1.0).abs() < 1e-5);

        let bright = PointLight {
            position: Vec3::ZERO,
            flux: Vec3::new(0.0, 10000.0, 0.0),
        };
        let max_radius = 1.0 / PointLight::ATTENUATION_CUTOFF.sqrt();
        assert!((bright.calculate_radius() - max_radius).abs() < 1e-4);
    }

    #[test]
    fn test_dark_light_has_infinite_radius() {
        let dark = PointLight {
            position: Vec3::ONE,
            flux: Vec3::ZERO,
        };
        assert_eq!(dark.calculate_radius(), f32::INFINITY);
    }
}
