use std::path::Path;

use anyhow::Context;
use lumen_render_interface::render_settings::{RenderConfig, WindowExtent};
use serde::{Deserialize, Serialize};

/// 演示程序的配置，渲染相关的部分在 `[render]` 中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 0 表示一直渲染到逻辑线程结束
    pub frame_count: u64,
    pub logic_tick_count: u64,
    pub logic_tick_interval_ms: u64,
    pub game_object_count: u64,
    pub resize_to: Option<WindowExtent>,
    /// 相对于 config 目录
    pub global_rendering_file: Option<String>,
    pub use_fs_assets: bool,

    pub render: RenderConfig,
}
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frame_count: 0,
            logic_tick_count: 120,
            logic_tick_interval_ms: 4,
            game_object_count: 12,
            resize_to: None,
            global_rendering_file: None,
            use_fs_assets: false,
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::warn!("app config {} not found, use default", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&text).with_context(|| format!("invalid app config {}", path.display()))?;
        log::info!("load app config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.render.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use lumen_render_interface::render_settings::RenderPipelineType;

    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            game_object_count = 3

            [render]
            max_frames_in_flight = 2
            render_pipeline_type = "Forward"
            "#,
        )
        .unwrap();
        assert_eq!(config.game_object_count, 3);
        assert_eq!(config.logic_tick_count, AppConfig::default().logic_tick_count);
        assert_eq!(config.render.max_frames_in_flight, 2);
        assert_eq!(config.render.render_pipeline_type, RenderPipelineType::Forward);
        assert_eq!(config.render.ring_buffer_size, RenderConfig::default().ring_buffer_size);
    }

    #[test]
    fn test_invalid_render_config_is_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
            [render]
            max_frames_in_flight = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_workspace_config_parses() {
        let path = lumen_crate_tools::resource::LumenPath::config_path("lumen-app.toml");
        let config = AppConfig::load_or_default(&path).unwrap();
        assert!(config.render.point_light_shadow_map_dimension <= 512);
        assert!(config.resize_to.is_some());
    }
}
