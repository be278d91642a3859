use ash::vk;

pub type RhiResult<T> = Result<T, RhiError>;

/// RHI 层的错误
///
/// 区分三类情况：
/// - swapchain 失效：需要重建 swapchain，不是应用错误
/// - 致命的设备错误：device lost、fence 等待超时、内存耗尽
/// - 调用方的误用：无效句柄、违反 API 约束
#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("device lost")]
    DeviceLost,

    #[error("fence wait timed out after {timeout_ns} ns")]
    FenceTimeout { timeout_ns: u64 },

    #[error("out of memory while creating {0}")]
    OutOfMemory(String),

    #[error("invalid {kind} handle")]
    InvalidHandle { kind: &'static str },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("vulkan error: {0:?}")]
    Vk(vk::Result),
}

impl RhiError {
    /// 需要重建 swapchain 的错误
    #[inline]
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate)
    }

    /// 无法在当前帧内恢复的错误，需要上报给宿主程序
    ///
    /// fence 超时被视为 device lost
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !self.is_out_of_date()
    }

    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::FenceTimeout { .. })
    }

    #[inline]
    pub fn invalid_handle(kind: &'static str) -> Self {
        Self::InvalidHandle { kind }
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT => Self::FenceTimeout { timeout_ns: 0 },
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::OutOfMemory(format!("{result:?}"))
            }
            other => Self::Vk(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_mapping() {
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(RhiError::from(vk::Result::TIMEOUT).is_device_lost());
        assert!(matches!(RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), RhiError::OutOfMemory(_)));
        assert!(matches!(RhiError::from(vk::Result::ERROR_INITIALIZATION_FAILED), RhiError::Vk(_)));
    }

    #[test]
    fn test_only_out_of_date_is_recoverable() {
        assert!(!RhiError::SwapchainOutOfDate.is_fatal());
        assert!(RhiError::DeviceLost.is_fatal());
        assert!(RhiError::FenceTimeout { timeout_ns: 10 }.is_fatal());
        assert!(RhiError::invalid_handle("buffer").is_fatal());
    }
}
