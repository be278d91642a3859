use std::{collections::HashMap, hash::Hash};

/// 元素与 GUID 之间的双向映射
///
/// GUID 从 1 开始，0 表示无效。分配时总是返回最小的空闲 GUID；
/// 已经分配过的元素（按值相等）直接返回原来的 GUID。
#[derive(Debug, Clone)]
pub struct GuidAllocator<T: Eq + Hash + Clone> {
    elements_guid_map: HashMap<T, usize>,
    guid_elements_map: HashMap<usize, T>,
}

impl<T: Eq + Hash + Clone> Default for GuidAllocator<T> {
    fn default() -> Self {
        Self {
            elements_guid_map: HashMap::new(),
            guid_elements_map: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> GuidAllocator<T> {
    pub const INVALID_GUID: usize = 0;

    #[inline]
    pub fn is_valid_guid(guid: usize) -> bool {
        guid != Self::INVALID_GUID
    }

    pub fn alloc_guid(&mut self, element: &T) -> usize {
        if let Some(guid) = self.elements_guid_map.get(element) {
            return *guid;
        }

        let guid = (1..=self.guid_elements_map.len() + 1)
            .find(|guid| !self.guid_elements_map.contains_key(guid))
            .unwrap_or(self.guid_elements_map.len() + 1);
        self.guid_elements_map.insert(guid, element.clone());
        self.elements_guid_map.insert(element.clone(), guid);
        guid
    }

    #[inline]
    pub fn get_guid_related_element(&self, guid: usize) -> Option<&T> {
        self.guid_elements_map.get(&guid)
    }

    #[inline]
    pub fn get_element_guid(&self, element: &T) -> Option<usize> {
        self.elements_guid_map.get(element).copied()
    }

    #[inline]
    pub fn has_element(&self, element: &T) -> bool {
        self.elements_guid_map.contains_key(element)
    }

    pub fn free_guid(&mut self, guid: usize) {
        if let Some(element) = self.guid_elements_map.remove(&guid) {
            self.elements_guid_map.remove(&element);
        }
    }

    pub fn free_element(&mut self, element: &T) {
        if let Some(guid) = self.elements_guid_map.remove(element) {
            self.guid_elements_map.remove(&guid);
        }
    }

    /// 升序排列
    pub fn get_allocated_guids(&self) -> Vec<usize> {
        let mut guids = self.guid_elements_map.keys().copied().collect::<Vec<_>>();
        guids.sort_unstable();
        guids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.guid_elements_map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.guid_elements_map.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements_guid_map.clear();
        self.guid_elements_map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_elements_share_guid() {
        let mut allocator = GuidAllocator::<String>::default();
        let a = allocator.alloc_guid(&"cube.obj".to_string());
        let b = allocator.alloc_guid(&"cube.obj".to_string());
        let c = allocator.alloc_guid(&"sphere.obj".to_string());
        assert_eq!(a, 1);
        assert_eq!(a, b);
        assert_eq!(c, 2);
        assert_eq!(allocator.len(), 2);
        assert_eq!(allocator.get_guid_related_element(2).map(String::as_str), Some("sphere.obj"));
    }

    #[test]
    fn test_freed_guid_is_reused() {
        let mut allocator = GuidAllocator::<u32>::default();
        for v in 10..14 {
            allocator.alloc_guid(&v);
        }
        allocator.free_guid(2);
        allocator.free_element(&13);
        assert_eq!(allocator.get_allocated_guids(), vec![1, 3]);
        assert_eq!(allocator.alloc_guid(&99), 2);
        assert_eq!(allocator.alloc_guid(&100), 4);
        assert!(!allocator.has_element(&11));
        assert!(!GuidAllocator::<u32>::is_valid_guid(0));
    }
}
