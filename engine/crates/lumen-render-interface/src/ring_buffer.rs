use ash::vk;
use itertools::Itertools;

use lumen_rhi::{
    desc::{RhiBufferDesc, RhiMemoryLocation},
    error::RhiError,
    handles::RhiBufferHandle,
    rhi::Rhi,
};

use crate::frame_counter::FrameSlot;

#[derive(thiserror::Error, Debug)]
pub enum RingBufferError {
    /// ring buffer 的大小来自配置，空间不足说明配置过小，不应该重试
    #[error("ring buffer slot {slot} exhausted: requested {requested} bytes, {available} bytes available")]
    Exhausted {
        slot: usize,
        requested: u64,
        available: u64,
    },

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

/// ring buffer 中分配出的一段连续空间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAllocation {
    pub buffer: RhiBufferHandle,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// host visible 的上传 buffer，按 frame slot 均分
///
/// 每个 slot 内部的写入位置单调递增，不会回绕；slot 只会在帧开始时（fence 已经 signal）被重置，
/// 所以一个 slot 的写入不会覆盖 GPU 仍在读取的数据。
pub struct RingBuffer {
    buffer: RhiBufferHandle,
    alignment: vk::DeviceSize,

    begins: Vec<vk::DeviceSize>,
    sizes: Vec<vk::DeviceSize>,
    /// 每个 slot 下一次分配的起始位置
    ends: Vec<vk::DeviceSize>,
}

// new & init
impl RingBuffer {
    /// `begin[i] = size * i / K`，`size[i] = size * (i + 1) / K - begin[i]`
    pub fn new(
        rhi: &mut dyn Rhi,
        total_size: vk::DeviceSize,
        fif_count: usize,
        alignment: vk::DeviceSize,
    ) -> Result<Self, RhiError> {
        let desc = RhiBufferDesc::new(
            total_size,
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::UNIFORM_BUFFER,
            RhiMemoryLocation::CpuToGpu,
        );
        let buffer = rhi.create_buffer(&desc, "ring-buffer")?;

        let k = fif_count as vk::DeviceSize;
        let begins = (0..k).map(|i| total_size * i / k).collect_vec();
        let sizes = (0..k).map(|i| total_size * (i + 1) / k - begins[i as usize]).collect_vec();

        Ok(Self {
            buffer,
            alignment: alignment.max(1),
            ends: begins.clone(),
            begins,
            sizes,
        })
    }
}

// getters
impl RingBuffer {
    #[inline]
    pub fn buffer(&self) -> RhiBufferHandle {
        self.buffer
    }

    /// slot 中已经使用的字节数
    #[inline]
    pub fn used(&self, slot: FrameSlot) -> vk::DeviceSize {
        self.ends[*slot] - self.begins[*slot]
    }

    #[inline]
    pub fn slot_range(&self, slot: FrameSlot) -> (vk::DeviceSize, vk::DeviceSize) {
        (self.begins[*slot], self.sizes[*slot])
    }
}

// update
impl RingBuffer {
    /// 帧开始时调用，此时该 slot 的 fence 已经 signal
    #[inline]
    pub fn reset_slot(&mut self, slot: FrameSlot) {
        self.ends[*slot] = self.begins[*slot];
    }

    /// 在 slot 中分配一段对齐的空间
    pub fn allocate(&mut self, slot: FrameSlot, size: vk::DeviceSize) -> Result<RingAllocation, RingBufferError> {
        let slot_end = self.begins[*slot] + self.sizes[*slot];
        let offset = self.ends[*slot].next_multiple_of(self.alignment);
        if offset + size > slot_end {
            let available = slot_end.saturating_sub(offset);
            log::error!(
                "ring buffer slot {} exhausted: requested {} bytes, {} bytes available",
                slot,
                size,
                available
            );
            return Err(RingBufferError::Exhausted {
                slot: *slot,
                requested: size,
                available,
            });
        }

        self.ends[*slot] = offset + size;
        Ok(RingAllocation {
            buffer: self.buffer,
            offset,
            size,
        })
    }

    /// 分配并写入数据
    pub fn push_bytes(
        &mut self,
        rhi: &mut dyn Rhi,
        slot: FrameSlot,
        bytes: &[u8],
    ) -> Result<RingAllocation, RingBufferError> {
        let allocation = self.allocate(slot, bytes.len() as vk::DeviceSize)?;
        rhi.write_buffer(self.buffer, allocation.offset, bytes)?;
        Ok(allocation)
    }
}

// destroy
impl RingBuffer {
    pub fn destroy(self, rhi: &mut dyn Rhi) {
        rhi.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use lumen_rhi::headless::HeadlessRhi;

    use super::*;

    #[test]
    fn test_slots_split_evenly() {
        let mut rhi = HeadlessRhi::new();
        let ring = RingBuffer::new(&mut rhi, 1000, 3, 4).unwrap();
        assert_eq!(ring.slot_range(FrameSlot::from_usize(0)), (0, 333));
        assert_eq!(ring.slot_range(FrameSlot::from_usize(1)), (333, 333));
        assert_eq!(ring.slot_range(FrameSlot::from_usize(2)), (666, 334));
        ring.destroy(&mut rhi);
    }

    #[test]
    fn test_allocation_is_aligned_and_bounded() {
        let mut rhi = HeadlessRhi::new();
        let mut ring = RingBuffer::new(&mut rhi, 3 * 1024, 3, 256).unwrap();
        let slot = FrameSlot::from_usize(1);

        let a = ring.allocate(slot, 10).unwrap();
        let b = ring.allocate(slot, 10).unwrap();
        assert_eq!(a.offset, 1024);
        assert_eq!(b.offset, 1024 + 256);

        let err = ring.allocate(slot, 1024).unwrap_err();
        assert!(matches!(
            err,
            RingBufferError::Exhausted {
                slot: 1,
                requested: 1024,
                available: 512,
            }
        ));

        ring.reset_slot(slot);
        assert_eq!(ring.used(slot), 0);
        assert_eq!(ring.allocate(slot, 1024).unwrap().offset, 1024);
        ring.destroy(&mut rhi);
    }

    #[test]
    fn test_push_bytes_writes_mapped_memory() {
        let mut rhi = HeadlessRhi::new();
        let mut ring = RingBuffer::new(&mut rhi, 512, 2, 16).unwrap();
        let allocation = ring.push_bytes(&mut rhi, FrameSlot::from_usize(1), &[9, 8, 7]).unwrap();
        let mut out = [0u8; 3];
        rhi.read_buffer(ring.buffer(), allocation.offset, &mut out).unwrap();
        assert_eq!(allocation.offset, 256);
        assert_eq!(out, [9, 8, 7]);
        ring.destroy(&mut rhi);
    }
}
