use lumen_render_interface::{render_settings::ConfigError, ring_buffer::RingBufferError};
use lumen_rhi::error::RhiError;

/// 渲染器向上层报告的错误
///
/// swapchain out of date 在内部处理，不会出现在这里
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("rhi error: {0}")]
    Rhi(#[from] RhiError),

    /// ring buffer 的容量是配置决定的，耗尽说明配置过小
    #[error("ring buffer slot {slot} exhausted: requested {requested} bytes, {available} bytes available")]
    RingExhausted {
        slot: usize,
        requested: u64,
        available: u64,
    },

    #[error("asset error: {0:#}")]
    Asset(anyhow::Error),

    #[error("invalid pass state: {0}")]
    PassState(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<RingBufferError> for RenderError {
    fn from(e: RingBufferError) -> Self {
        match e {
            RingBufferError::Exhausted {
                slot,
                requested,
                available,
            } => Self::RingExhausted {
                slot,
                requested,
                available,
            },
            RingBufferError::Rhi(e) => Self::Rhi(e),
        }
    }
}

impl RenderError {
    /// 不可恢复的设备错误
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Rhi(e) if e.is_device_lost())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_error_conversion() {
        let e: RenderError = RingBufferError::Exhausted {
            slot: 1,
            requested: 512,
            available: 128,
        }
        .into();
        assert!(matches!(
            e,
            RenderError::RingExhausted {
                slot: 1,
                requested: 512,
                available: 128
            }
        ));

        let e: RenderError = RingBufferError::Rhi(RhiError::DeviceLost).into();
        assert!(e.is_device_lost());
    }
}
