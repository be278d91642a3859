use ash::vk;
use itertools::Itertools;

use lumen_rhi::{
    error::{RhiError, RhiResult},
    handles::{RhiCommandBufferHandle, RhiCommandPoolHandle, RhiFenceHandle, RhiSemaphoreHandle},
    rhi::Rhi,
    submit_info::RhiSubmitInfo,
};

use crate::frame_counter::{FrameCounter, FrameSlot};

/// 一个 frame slot 独占的资源
#[derive(Default)]
pub struct FrameSlotResources {
    pub command_pool: RhiCommandPoolHandle,
    pub command_buffer: RhiCommandBufferHandle,
    /// 创建时处于 signaled 状态，第一次使用时无需等待
    pub fence: RhiFenceHandle,
    pub image_available: RhiSemaphoreHandle,
    pub render_finished: RhiSemaphoreHandle,

    /// 最近一次使用该 slot 提交的帧
    pub last_submitted_frame: Option<u64>,
    /// fence 等待完成时确认已经执行完毕的帧
    pub last_signaled_frame: Option<u64>,
}

/// Frames in Flight 的资源
///
/// 为每帧管理独立的 command pool、command buffer 以及同步原语。
/// slot i 只有在其 fence signal 之后才能被复用，这是限制渲染线程领先 GPU 的唯一手段。
pub struct FrameResources {
    slots: Vec<FrameSlotResources>,
    fence_timeout_ns: u64,

    destroyed: bool,
}

// new & init
impl FrameResources {
    pub fn new(rhi: &mut dyn Rhi, fif_count: usize, fence_timeout_ns: u64) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(fif_count);
        for i in 0..fif_count {
            match FrameSlotResources::new(rhi, FrameSlot::from_usize(i)) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    log::error!("failed to create frame resources of slot {}: {}", i, e);
                    slots.into_iter().for_each(|slot| slot.destroy(rhi));
                    return Err(e);
                }
            }
        }

        log::info!("create frame resources for {} frames in flight", fif_count);
        Ok(Self {
            slots,
            fence_timeout_ns,
            destroyed: false,
        })
    }
}
impl FrameSlotResources {
    /// 创建失败时，已经创建的对象会被销毁
    fn new(rhi: &mut dyn Rhi, label: FrameSlot) -> RhiResult<Self> {
        let mut slot = Self::default();
        match slot.create_objects(rhi, label) {
            Ok(()) => Ok(slot),
            Err(e) => {
                slot.destroy(rhi);
                Err(e)
            }
        }
    }

    fn create_objects(&mut self, rhi: &mut dyn Rhi, label: FrameSlot) -> RhiResult<()> {
        self.command_pool = rhi.create_command_pool(&format!("frame-{}", label))?;
        self.command_buffer = rhi.allocate_command_buffer(self.command_pool, &format!("[{}]frame-cmd", label))?;
        self.fence = rhi.create_fence(true, &format!("[{}]frame-fence", label))?;
        self.image_available = rhi.create_semaphore(&format!("[{}]image-available", label))?;
        self.render_finished = rhi.create_semaphore(&format!("[{}]render-finished", label))?;
        Ok(())
    }
}

// getters
impl FrameResources {
    #[inline]
    pub fn slot(&self, slot: FrameSlot) -> &FrameSlotResources {
        &self.slots[*slot]
    }

    #[inline]
    pub fn command_buffer(&self, slot: FrameSlot) -> RhiCommandBufferHandle {
        self.slots[*slot].command_buffer
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.slots.len()
    }

    /// 即将以 `frame_id` 复用 slot 时，上一次使用该 slot 的帧是否已经执行完毕
    pub fn can_reuse_slot(&self, frame_counter: &FrameCounter) -> bool {
        let slot = &self.slots[*frame_counter.frame_slot()];
        match slot.last_submitted_frame {
            None => true,
            Some(submitted) => slot.last_signaled_frame.is_some_and(|signaled| signaled >= submitted),
        }
    }
}

// update
impl FrameResources {
    /// 等待 slot 的 fence，然后重置 command pool 并开始录制
    ///
    /// fence 等待超时视为 device lost
    pub fn begin_slot(&mut self, rhi: &mut dyn Rhi, frame_counter: &FrameCounter) -> RhiResult<RhiCommandBufferHandle> {
        let _span = tracy_client::span!("FrameResources::begin_slot");
        let slot_index = *frame_counter.frame_slot();
        let timeout_ns = self.fence_timeout_ns;
        let slot = &mut self.slots[slot_index];

        rhi.wait_for_fences(&[slot.fence], timeout_ns).map_err(|e| {
            log::error!("{} wait for frame fence failed: {}", frame_counter.frame_name(), e);
            match e {
                RhiError::FenceTimeout { .. } => RhiError::FenceTimeout { timeout_ns },
                other => other,
            }
        })?;
        slot.last_signaled_frame = slot.last_submitted_frame;
        debug_assert!(self.can_reuse_slot(frame_counter));

        let slot = &self.slots[slot_index];
        rhi.reset_command_pool(slot.command_pool)?;
        rhi.begin_command_buffer(slot.command_buffer)?;
        Ok(slot.command_buffer)
    }

    /// 结束录制并提交
    ///
    /// - `present`: 等待 image available，并 signal render finished，供 present 使用
    /// - 否则只提交命令（例如 acquire 失败的帧，需要让已经录制的上传完成并 signal fence）
    pub fn submit_slot(&mut self, rhi: &mut dyn Rhi, frame_counter: &FrameCounter, present: bool) -> RhiResult<()> {
        let _span = tracy_client::span!("FrameResources::submit_slot");
        let slot = &mut self.slots[*frame_counter.frame_slot()];

        rhi.end_command_buffer(slot.command_buffer)?;

        let mut submit_info = RhiSubmitInfo::new(&[slot.command_buffer]);
        if present {
            submit_info = submit_info
                .wait(slot.image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .signal(slot.render_finished);
        }

        rhi.reset_fences(&[slot.fence])?;
        rhi.queue_submit(&[submit_info], Some(slot.fence))?;
        slot.last_submitted_frame = Some(frame_counter.frame_id());
        Ok(())
    }
}

// destroy
impl FrameSlotResources {
    /// 未创建的对象是空 handle，销毁时会被忽略
    fn destroy(self, rhi: &mut dyn Rhi) {
        rhi.destroy_semaphore(self.render_finished);
        rhi.destroy_semaphore(self.image_available);
        rhi.destroy_fence(self.fence);
        rhi.destroy_command_pool(self.command_pool);
    }
}
impl FrameResources {
    pub fn destroy(mut self, rhi: &mut dyn Rhi) {
        for slot in self.slots.drain(..).collect_vec() {
            slot.destroy(rhi);
        }
        self.destroyed = true;
    }
}
impl Drop for FrameResources {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(self.destroyed || self.slots.is_empty(), "FrameResources dropped without destroy");
    }
}

#[cfg(test)]
mod tests {
    use lumen_rhi::headless::HeadlessRhi;

    use super::*;

    #[test]
    fn test_slot_reuse_waits_for_fence() {
        let mut rhi = HeadlessRhi::new();
        let mut frames = FrameResources::new(&mut rhi, 2, 1_000).unwrap();
        let mut counter = FrameCounter::new(0, 2);

        for i in 0..6 {
            // 第一轮的 slot 从未提交过
            assert_eq!(frames.can_reuse_slot(&counter), i < 2);
            frames.begin_slot(&mut rhi, &counter).unwrap();
            assert!(frames.can_reuse_slot(&counter));

            frames.submit_slot(&mut rhi, &counter, false).unwrap();
            assert!(!frames.can_reuse_slot(&counter));
            let slot = frames.slot(counter.frame_slot());
            assert_eq!(slot.last_submitted_frame, Some(counter.frame_id()));
            counter.next_frame();
        }

        assert_eq!(rhi.stats().submits, 6);
        assert_eq!(rhi.stats().fence_waits, 6);
        frames.destroy(&mut rhi);
        assert_eq!(rhi.live_object_count(), 0);
    }

    #[test]
    fn test_failed_create_releases_created_objects() {
        let mut rhi = HeadlessRhi::new();
        // 每个 slot 创建 5 个对象，第二个 slot 的 fence 创建失败
        rhi.inject_create_fault(7);
        assert!(matches!(FrameResources::new(&mut rhi, 3, 1_000), Err(RhiError::OutOfMemory(_))));
        assert_eq!(rhi.live_object_count(), 0);

        let frames = FrameResources::new(&mut rhi, 3, 1_000).unwrap();
        assert_eq!(frames.fif_count(), 3);
        frames.destroy(&mut rhi);
        assert_eq!(rhi.live_object_count(), 0);
    }

    #[test]
    fn test_unsubmitted_fence_times_out_as_fatal() {
        let mut rhi = HeadlessRhi::new();
        let mut frames = FrameResources::new(&mut rhi, 1, 77).unwrap();
        let counter = FrameCounter::new(0, 1);

        // fence 被 reset 但是没有提交，等待永远不会完成
        let fence = frames.slot(counter.frame_slot()).fence;
        rhi.reset_fences(&[fence]).unwrap();

        let err = frames.begin_slot(&mut rhi, &counter).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { timeout_ns: 77 }));
        assert!(err.is_fatal());
        frames.destroy(&mut rhi);
    }
}
