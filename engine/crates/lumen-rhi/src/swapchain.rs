use ash::vk;

/// swapchain 重建之后，pass 需要据此重建 framebuffer 等尺寸相关的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhiSwapchainInfo {
    pub extent: vk::Extent2D,
    pub image_format: vk::Format,
    pub image_count: u32,
    pub depth_format: vk::Format,
}

/// acquire 成功的结果
///
/// out of date 以 [`crate::error::RhiError::SwapchainOutOfDate`] 返回；
/// suboptimal 时 image 仍然可用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhiAcquiredImage {
    pub image_index: u32,
    pub suboptimal: bool,
}

/// 确定 swapchain 的 extent 尺寸
///
/// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
pub fn calculate_swapchain_extent(
    surface_capabilities: &vk::SurfaceCapabilitiesKHR,
    window_physical_extent: vk::Extent2D,
) -> vk::Extent2D {
    let surface_extent = surface_capabilities.current_extent;
    if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
        let width = window_physical_extent
            .width
            .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
        let height = window_physical_extent
            .height
            .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
        vk::Extent2D { width, height }
    } else {
        surface_extent
    }
}

/// swapchain image 的数量：min + 1，且不超过 max（max 为 0 表示不限制）
pub fn calculate_swapchain_image_count(surface_capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if surface_capabilities.max_image_count == 0 {
        surface_capabilities.min_image_count + 1
    } else {
        u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
    }
}
