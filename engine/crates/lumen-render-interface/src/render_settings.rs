use std::path::Path;

use ash::vk;
use serde::{Deserialize, Serialize};

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::R8G8B8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEFAULT_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::MAILBOX;
    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] = &[
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    /// 场景中点光源的上限，与着色器中的数组大小一致
    pub const MAX_POINT_LIGHT_COUNT: usize = 15;
    /// 一个 draw call 最多绘制的实例数
    pub const MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT: usize = 64;
    /// 每个实例最多的骨骼数量
    pub const MESH_VERTEX_BLENDING_MAX_JOINT_COUNT: usize = 1024;
}

/// 主相机 pass 的着色路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderPipelineType {
    Forward,
    #[default]
    Deferred,
}

/// 每种 descriptor 的数量上限
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub uniform_buffer: u32,
    pub uniform_buffer_dynamic: u32,
    pub storage_buffer: u32,
    pub storage_buffer_dynamic: u32,
    pub combined_image_sampler: u32,
    pub input_attachment: u32,
}
impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            // per-frame + mesh + material + 各个 pass 自己的 set
            max_sets: 1 + 256 + 1000 + 32,
            uniform_buffer: 1000,
            uniform_buffer_dynamic: 16,
            storage_buffer: 256,
            storage_buffer_dynamic: 16,
            combined_image_sampler: 1000 * 5 + 64,
            input_attachment: 16,
        }
    }
}
impl DescriptorPoolConfig {
    pub fn pool_sizes(&self) -> Vec<(vk::DescriptorType, u32)> {
        [
            (vk::DescriptorType::UNIFORM_BUFFER, self.uniform_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, self.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER, self.storage_buffer),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, self.storage_buffer_dynamic),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, self.combined_image_sampler),
            (vk::DescriptorType::INPUT_ATTACHMENT, self.input_attachment),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowExtent {
    pub width: u32,
    pub height: u32,
}
impl From<WindowExtent> for vk::Extent2D {
    fn from(extent: WindowExtent) -> Self {
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }
}

/// 初始化时确定的渲染配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub max_frames_in_flight: usize,
    /// 所有 frame slot 共享的 ring buffer 大小（字节）
    pub ring_buffer_size: u64,
    pub descriptor_pool: DescriptorPoolConfig,
    /// fence 等待的上限，超时视为 device lost
    pub fence_timeout_ns: u64,
    pub point_light_shadow_map_dimension: u32,
    pub directional_light_shadow_map_dimension: u32,
    pub initial_extent: WindowExtent,
    pub render_pipeline_type: RenderPipelineType,
}
impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 3,
            ring_buffer_size: 128 * 1024 * 1024,
            descriptor_pool: DescriptorPoolConfig::default(),
            fence_timeout_ns: 5_000_000_000,
            point_light_shadow_map_dimension: 2048,
            directional_light_shadow_map_dimension: 4096,
            initial_extent: WindowExtent {
                width: 1280,
                height: 768,
            },
            render_pipeline_type: RenderPipelineType::Deferred,
        }
    }
}

/// 配置相关的错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl RenderConfig {
    /// 每个 frame slot 至少要能容纳一次 per-frame 数据的写入
    pub const MIN_RING_SLOT_SIZE: u64 = 64 * 1024;

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("load render config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.max_frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "max_frames_in_flight must be in 1..=8, got {}",
                self.max_frames_in_flight
            )));
        }
        if self.ring_buffer_size == 0 {
            return Err(ConfigError::Invalid("ring_buffer_size must not be zero".to_string()));
        }
        let slot_size = self.ring_buffer_size / self.max_frames_in_flight as u64;
        if slot_size < Self::MIN_RING_SLOT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "ring buffer slot of {} bytes is smaller than {} bytes",
                slot_size,
                Self::MIN_RING_SLOT_SIZE
            )));
        }
        if self.point_light_shadow_map_dimension == 0 || self.directional_light_shadow_map_dimension == 0 {
            return Err(ConfigError::Invalid("shadow map dimension must not be zero".to_string()));
        }
        if self.descriptor_pool.max_sets == 0 {
            return Err(ConfigError::Invalid("descriptor pool max_sets must not be zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RenderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.render_pipeline_type, RenderPipelineType::Deferred);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            max_frames_in_flight = 2
            render_pipeline_type = "Forward"

            [descriptor_pool]
            max_sets = 32
            "#,
        )
        .unwrap();
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.render_pipeline_type, RenderPipelineType::Forward);
        assert_eq!(config.descriptor_pool.max_sets, 32);
        assert_eq!(config.descriptor_pool.uniform_buffer, DescriptorPoolConfig::default().uniform_buffer);
        assert_eq!(config.ring_buffer_size, RenderConfig::default().ring_buffer_size);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(RenderConfig::from_toml_str("max_frames_in_flight = 9"), Err(ConfigError::Invalid(_))));
        assert!(matches!(RenderConfig::from_toml_str("ring_buffer_size = 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(RenderConfig::from_toml_str("ring_buffer_size = 1024"), Err(ConfigError::Invalid(_))));
        assert!(matches!(RenderConfig::from_toml_str("max_frames_in_flight = \"x\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut config = RenderConfig::default();
        config.fence_timeout_ns = 1_000;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RenderConfig::from_toml_str(&text).unwrap(), config);
    }
}
