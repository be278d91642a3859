use lumen_rhi::{
    handles::{
        RhiBufferHandle, RhiDescriptorPoolHandle, RhiFramebufferHandle, RhiImageHandle, RhiImageViewHandle,
        RhiSamplerHandle,
    },
    rhi::Rhi,
};

/// 等待销毁的 GPU 对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredResource {
    Buffer(RhiBufferHandle),
    Image(RhiImageHandle),
    ImageView(RhiImageViewHandle),
    Sampler(RhiSamplerHandle),
    Framebuffer(RhiFramebufferHandle),
    DescriptorPool(RhiDescriptorPoolHandle),
}
impl DeferredResource {
    fn destroy(self, rhi: &mut dyn Rhi) {
        match self {
            Self::Buffer(h) => rhi.destroy_buffer(h),
            Self::Image(h) => rhi.destroy_image(h),
            Self::ImageView(h) => rhi.destroy_image_view(h),
            Self::Sampler(h) => rhi.destroy_sampler(h),
            Self::Framebuffer(h) => rhi.destroy_framebuffer(h),
            Self::DescriptorPool(h) => rhi.destroy_descriptor_pool(h),
        }
    }
}

/// 延迟销毁队列
///
/// 被替换的资源可能仍在被 in flight 的帧使用，记录提交销毁时的帧序号，
/// 当 `frame + fif_count <= current_frame` 时才真正销毁。
#[derive(Default)]
pub struct DeferredDestroyQueue {
    /// (resource, frame_id)
    pending: Vec<(DeferredResource, u64)>,
}

impl DeferredDestroyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, resource: DeferredResource, frame_id: u64) {
        self.pending.push((resource, frame_id));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 销毁已经不再被 GPU 使用的资源
    pub fn cleanup(&mut self, rhi: &mut dyn Rhi, current_frame_id: u64, fif_count: usize) {
        let _span = tracy_client::span!("DeferredDestroyQueue::cleanup");

        let fif = fif_count as u64;
        let mut to_destroy = Vec::new();
        self.pending.retain(|(resource, frame_id)| {
            if *frame_id + fif <= current_frame_id {
                to_destroy.push(*resource);
                false
            } else {
                true
            }
        });
        for resource in to_destroy {
            resource.destroy(rhi);
        }
    }

    /// 立即销毁所有资源，调用前需要 device idle
    pub fn flush(&mut self, rhi: &mut dyn Rhi) {
        for (resource, _) in self.pending.drain(..) {
            resource.destroy(rhi);
        }
    }
}

#[cfg(test)]
mod tests {
    use lumen_rhi::{desc::RhiBufferDesc, headless::HeadlessRhi};

    use super::*;

    #[test]
    fn test_resource_outlives_frames_in_flight() {
        let mut rhi = HeadlessRhi::new();
        let buffer = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(16), "old").unwrap();
        let mut queue = DeferredDestroyQueue::new();
        queue.push(DeferredResource::Buffer(buffer), 10);

        queue.cleanup(&mut rhi, 12, 3);
        assert_eq!(rhi.live_buffer_count(), 1);
        queue.cleanup(&mut rhi, 13, 3);
        assert_eq!(rhi.live_buffer_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_destroys_everything() {
        let mut rhi = HeadlessRhi::new();
        let buffer = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(16), "old").unwrap();
        let mut queue = DeferredDestroyQueue::new();
        queue.push(DeferredResource::Buffer(buffer), 10);
        queue.flush(&mut rhi);
        assert_eq!(rhi.live_object_count(), 0);
    }
}
