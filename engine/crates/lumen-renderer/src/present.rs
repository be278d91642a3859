use ash::vk;
use lumen_rhi::{
    error::RhiResult,
    handles::{RhiImageViewHandle, RhiSemaphoreHandle},
    rhi::Rhi,
    swapchain::RhiSwapchainInfo,
};

use crate::render_pass::SwapchainTargets;

/// acquire 的结果，out of date 不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// present 的结果，out of date 不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// 已经 present，但下一帧之前需要重建 swapchain
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    #[inline]
    pub fn need_recreate(&self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// 持有 swapchain 的信息与 image view，负责 acquire、present 与重建
pub struct RenderPresent {
    swapchain_info: RhiSwapchainInfo,
    swapchain_image_views: Vec<RhiImageViewHandle>,
    window_extent: vk::Extent2D,
    acquire_timeout_ns: u64,
}

// new & init
impl RenderPresent {
    pub fn new(rhi: &mut dyn Rhi, window_extent: vk::Extent2D, acquire_timeout_ns: u64) -> RhiResult<Self> {
        let _span = tracy_client::span!("RenderPresent::new");
        let swapchain_info = rhi.create_swapchain(window_extent)?;
        Ok(Self {
            swapchain_info,
            swapchain_image_views: rhi.swapchain_image_views(),
            window_extent,
            acquire_timeout_ns,
        })
    }
}

// getters
impl RenderPresent {
    #[inline]
    pub fn swapchain_info(&self) -> RhiSwapchainInfo {
        self.swapchain_info
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain_info.extent
    }

    #[inline]
    pub fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    #[inline]
    pub fn targets(&self) -> SwapchainTargets<'_> {
        SwapchainTargets {
            info: self.swapchain_info,
            image_views: &self.swapchain_image_views,
        }
    }
}

// update
impl RenderPresent {
    /// 只记录新的窗口尺寸，重建由调用方在合适的时机进行
    #[inline]
    pub fn set_window_extent(&mut self, window_extent: vk::Extent2D) {
        self.window_extent = window_extent;
    }

    /// 先等待设备空闲，再以当前窗口尺寸重建 swapchain
    pub fn rebuild_after_resized(&mut self, rhi: &mut dyn Rhi) -> RhiResult<RhiSwapchainInfo> {
        let _span = tracy_client::span!("RenderPresent::rebuild_after_resized");
        rhi.device_wait_idle()?;
        rhi.destroy_swapchain();
        self.swapchain_image_views.clear();

        self.swapchain_info = rhi.create_swapchain(self.window_extent)?;
        self.swapchain_image_views = rhi.swapchain_image_views();
        log::info!(
            "swapchain rebuilt: {}x{}, {} images",
            self.swapchain_info.extent.width,
            self.swapchain_info.extent.height,
            self.swapchain_image_views.len()
        );
        Ok(self.swapchain_info)
    }

    pub fn acquire_image(&mut self, rhi: &mut dyn Rhi, image_available: RhiSemaphoreHandle) -> RhiResult<AcquireOutcome> {
        let _span = tracy_client::span!("RenderPresent::acquire_image");
        match rhi.acquire_next_image(image_available, self.acquire_timeout_ns) {
            Ok(acquired) => Ok(AcquireOutcome::Acquired {
                image_index: acquired.image_index,
                suboptimal: acquired.suboptimal,
            }),
            Err(e) if e.is_out_of_date() => {
                log::warn!("swapchain out of date on acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    pub fn present_image(
        &mut self,
        rhi: &mut dyn Rhi,
        image_index: u32,
        render_finished: RhiSemaphoreHandle,
    ) -> RhiResult<PresentOutcome> {
        let _span = tracy_client::span!("RenderPresent::present_image");
        match rhi.queue_present(image_index, &[render_finished]) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(e) if e.is_out_of_date() => {
                log::warn!("swapchain out of date on present, image {} is dropped", image_index);
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }
}

// destroy
impl RenderPresent {
    pub fn destroy(&mut self, rhi: &mut dyn Rhi) {
        self.swapchain_image_views.clear();
        rhi.destroy_swapchain();
    }
}

#[cfg(test)]
mod tests {
    use lumen_rhi::{
        error::RhiError,
        headless::{HeadlessFault, HeadlessRhi},
    };

    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_out_of_date_is_not_an_error() {
        let mut rhi = HeadlessRhi::new();
        let mut present = RenderPresent::new(&mut rhi, extent(64, 32), u64::MAX).unwrap();
        let semaphore = rhi.create_semaphore("image-available").unwrap();

        rhi.inject_acquire_fault(HeadlessFault::OutOfDate);
        assert_eq!(present.acquire_image(&mut rhi, semaphore).unwrap(), AcquireOutcome::OutOfDate);

        rhi.inject_acquire_fault(HeadlessFault::DeviceLost);
        let err = present.acquire_image(&mut rhi, semaphore).unwrap_err();
        assert!(matches!(err, RhiError::DeviceLost));

        rhi.destroy_semaphore(semaphore);
        present.destroy(&mut rhi);
    }

    #[test]
    fn test_rebuild_uses_new_window_extent() {
        let mut rhi = HeadlessRhi::new();
        let mut present = RenderPresent::new(&mut rhi, extent(64, 32), u64::MAX).unwrap();
        assert_eq!(present.extent(), extent(64, 32));
        let image_count = present.targets().image_views.len();

        present.set_window_extent(extent(128, 96));
        let info = present.rebuild_after_resized(&mut rhi).unwrap();
        assert_eq!(info.extent, extent(128, 96));
        assert_eq!(present.targets().image_views.len(), image_count);
        assert_eq!(rhi.stats().device_wait_idle, 1);
        assert_eq!(rhi.stats().swapchains_created, 2);

        present.destroy(&mut rhi);
        assert_eq!(rhi.live_object_count(), 0);
    }
}
