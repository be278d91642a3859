//! 关卡级别的全局渲染配置，通过 json 描述

use std::path::Path;

use anyhow::Context;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::source_desc::{CubeMapDesc, LevelColorGradingResourceDesc, LevelIblResourceDesc, LevelResourceDesc};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPose {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
}
impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(-5.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub pose: CameraPose,
    pub z_near: f32,
    pub z_far: f32,
    pub aspect: f32,
}
impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            pose: CameraPose::default(),
            z_near: 0.1,
            z_far: 1000.0,
            aspect: 1280.0 / 768.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalLightConfig {
    pub direction: Vec3,
    pub color: Vec3,
}
impl Default for DirectionalLightConfig {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-1.0, -1.0, -1.0),
            color: Vec3::ONE,
        }
    }
}

/// 关卡初始化时读取的全局渲染资源与默认参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalRenderingConfig {
    pub enable_fxaa: bool,
    pub skybox_irradiance_map: CubeMapDesc,
    pub skybox_specular_map: CubeMapDesc,
    pub brdf_map: String,
    pub color_grading_map: String,

    pub sky_color: Vec3,
    pub ambient_light: Vec3,
    pub camera_config: CameraConfig,
    pub directional_light: DirectionalLightConfig,
}
impl Default for GlobalRenderingConfig {
    fn default() -> Self {
        Self {
            enable_fxaa: false,
            skybox_irradiance_map: CubeMapDesc::default(),
            skybox_specular_map: CubeMapDesc::default(),
            brdf_map: String::new(),
            color_grading_map: String::new(),
            sky_color: Vec3::splat(0.5),
            ambient_light: Vec3::splat(0.03),
            camera_config: CameraConfig::default(),
            directional_light: DirectionalLightConfig::default(),
        }
    }
}

impl GlobalRenderingConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse global rendering config")
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read global rendering config: {}", path.display()))?;
        Self::from_json_str(&text)
    }

    /// 提取需要上传到 GPU 的关卡资源描述
    pub fn level_resource_desc(&self) -> LevelResourceDesc {
        LevelResourceDesc {
            ibl_resource_desc: LevelIblResourceDesc {
                skybox_irradiance_map: self.skybox_irradiance_map.clone(),
                skybox_specular_map: self.skybox_specular_map.clone(),
                brdf_map: self.brdf_map.clone(),
            },
            color_grading_resource_desc: LevelColorGradingResourceDesc {
                color_grading_map: self.color_grading_map.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_json() {
        let config = GlobalRenderingConfig::from_json_str(
            r#"{
                "enable_fxaa": true,
                "brdf_map": "textures/brdf.png",
                "skybox_irradiance_map": { "positive_x_map": "px.hdr" },
                "directional_light": { "direction": [0.0, 0.0, -1.0], "color": [2.0, 2.0, 2.0] }
            }"#,
        )
        .unwrap();
        assert!(config.enable_fxaa);
        assert_eq!(config.directional_light.direction, Vec3::NEG_Z);
        assert_eq!(config.camera_config, CameraConfig::default());

        let level = config.level_resource_desc();
        assert_eq!(level.ibl_resource_desc.brdf_map, "textures/brdf.png");
        assert_eq!(level.ibl_resource_desc.skybox_irradiance_map.positive_x_map, "px.hdr");
        assert!(level.color_grading_resource_desc.color_grading_map.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(GlobalRenderingConfig::from_json_str("{ not json").is_err());
    }
}
