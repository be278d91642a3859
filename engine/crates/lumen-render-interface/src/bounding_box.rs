use glam::Vec3;
use serde::{Deserialize, Serialize};

/// 轴对齐包围盒
///
/// 同时保存 center/half_extent 与 min/max，空包围盒的 min 为 +inf、max 为 -inf。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisAlignedBox {
    center: Vec3,
    half_extent: Vec3,
    min_corner: Vec3,
    max_corner: Vec3,
}

impl Default for AxisAlignedBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl AxisAlignedBox {
    pub const fn empty() -> Self {
        Self {
            center: Vec3::ZERO,
            half_extent: Vec3::ZERO,
            min_corner: Vec3::splat(f32::INFINITY),
            max_corner: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn new(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            center,
            half_extent,
            min_corner: center - half_extent,
            max_corner: center + half_extent,
        }
    }

    pub fn from_min_max(min_corner: Vec3, max_corner: Vec3) -> Self {
        Self {
            center: 0.5 * (min_corner + max_corner),
            half_extent: 0.5 * (max_corner - min_corner),
            min_corner,
            max_corner,
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bbox = Self::empty();
        for point in points {
            bbox.merge(point);
        }
        bbox
    }

    pub fn merge(&mut self, point: Vec3) {
        self.min_corner = self.min_corner.min(point);
        self.max_corner = self.max_corner.max(point);
        self.center = 0.5 * (self.min_corner + self.max_corner);
        self.half_extent = self.center - self.min_corner;
    }

    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_min_max(self.min_corner.min(other.min_corner), self.max_corner.max(other.max_corner))
    }

    /// 任意一个轴上 min > max
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_corner.cmpgt(self.max_corner).any()
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    #[inline]
    pub fn half_extent(&self) -> Vec3 {
        self.half_extent
    }

    #[inline]
    pub fn min_corner(&self) -> Vec3 {
        self.min_corner
    }

    #[inline]
    pub fn max_corner(&self) -> Vec3 {
        self.max_corner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_points() {
        let bbox = AxisAlignedBox::from_points([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 2.0, 4.0)]);
        assert_eq!(bbox.center(), Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(bbox.half_extent(), Vec3::new(1.0, 2.0, 2.0));
        assert!(!bbox.is_empty());
    }

    #[test]
    fn test_union_with_empty() {
        let a = AxisAlignedBox::new(Vec3::ONE, Vec3::ONE);
        assert!(AxisAlignedBox::empty().is_empty());
        assert_eq!(a.union(&AxisAlignedBox::empty()), a);
        assert_eq!(AxisAlignedBox::empty().union(&a), a);
        let b = a.union(&AxisAlignedBox::new(-Vec3::ONE, Vec3::ONE));
        assert_eq!(b.min_corner(), Vec3::splat(-2.0));
        assert_eq!(b.max_corner(), Vec3::splat(2.0));
    }
}
