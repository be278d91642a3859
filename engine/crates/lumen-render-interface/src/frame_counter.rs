use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B/C/...）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1/2/...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(usize);
impl Deref for FrameSlot {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Display for FrameSlot {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
    }
}
impl FrameSlot {
    #[inline]
    pub const fn from_usize(idx: usize) -> Self {
        Self(idx)
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        assert!((1..=8).contains(&fif_count), "frames in flight must be in 1..=8, got {fif_count}");
        Self {
            frame_id: init_frame_id,
            fif_count,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    #[inline]
    pub fn frame_slots(&self) -> impl Iterator<Item = FrameSlot> + use<> {
        (0..self.fif_count).map(FrameSlot::from_usize)
    }
    #[inline]
    pub fn frame_slot(&self) -> FrameSlot {
        FrameSlot::from_usize((self.frame_id % self.fif_count as u64) as usize)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_cycles_with_fif_count() {
        let mut counter = FrameCounter::new(0, 3);
        let slots = (0..7)
            .map(|_| {
                let slot = *counter.frame_slot();
                counter.next_frame();
                slot
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(42, 4);
        assert_eq!(counter.frame_name(), "[F42C]");
        assert_eq!(counter.frame_slots().map(|s| s.to_string()).collect::<String>(), "ABCD");
    }

    #[test]
    #[should_panic]
    fn test_zero_frames_in_flight_is_rejected() {
        let _ = FrameCounter::new(0, 0);
    }
}
