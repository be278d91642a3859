use ash::vk;

use crate::handles::{RhiCommandBufferHandle, RhiSemaphoreHandle};

/// 一次队列提交的内容，以 builder 的方式组装
///
/// ```ignore
/// let submit = RhiSubmitInfo::new(&[cmd])
///     .wait(image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
///     .signal(render_finished);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RhiSubmitInfo {
    pub command_buffers: Vec<RhiCommandBufferHandle>,
    pub wait_semaphores: Vec<(RhiSemaphoreHandle, vk::PipelineStageFlags2)>,
    pub signal_semaphores: Vec<RhiSemaphoreHandle>,
}

impl RhiSubmitInfo {
    #[inline]
    pub fn new(commands: &[RhiCommandBufferHandle]) -> Self {
        Self {
            command_buffers: commands.to_vec(),
            wait_semaphores: vec![],
            signal_semaphores: vec![],
        }
    }

    /// 不包含任何 command buffer 的提交，只用于 signal fence 或 semaphore
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn wait(mut self, semaphore: RhiSemaphoreHandle, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_semaphores.push((semaphore, stage));
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: RhiSemaphoreHandle) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }
}
