//! Offset/size range allocator with coalescing
//!
//! A [`FreeList`] tracks which byte ranges of an externally owned buffer are
//! free. It never touches the buffer itself, so it can sub-allocate GPU
//! buffers as easily as host memory.
//!
//! Free ranges are kept in a doubly-linked list ordered by offset. Links are
//! indices into a node pool whose capacity is fixed when the list is built
//! (or resized); running out of pool nodes is a recoverable error even when
//! the byte range itself would be valid.

use thiserror::Error;

/// Errors reported by [`FreeList`] operations. None of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FreeListError {
    #[error("zero-sized ranges cannot be allocated or freed")]
    InvalidSize,

    #[error("no free range can hold {requested} bytes ({free} bytes free in total)")]
    OutOfSpace { requested: u64, free: u64 },

    #[error("free-list node pool exhausted ({capacity} nodes)")]
    NodePoolExhausted { capacity: usize },

    #[error("range at offset {offset} of {size} bytes is invalid for a list of {total} bytes")]
    InvalidRange { offset: u64, size: u64, total: u64 },

    #[error("cannot shrink a free list from {current} to {requested} bytes")]
    ShrinkNotSupported { current: u64, requested: u64 },
}

#[derive(Debug, Clone, Copy)]
struct FreeListNode {
    offset: u64,
    size: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// First-fit range allocator over `[0, total_size)`.
#[derive(Debug, Clone)]
pub struct FreeList {
    total_size: u64,
    /// `None` entries are unused pool nodes.
    nodes: Vec<Option<FreeListNode>>,
    head: Option<usize>,
}

impl FreeList {
    /// Pool size used for a list of `total_size` bytes: one node per
    /// node-sized chunk of the managed range, at least one.
    pub fn node_capacity_for(total_size: u64) -> usize {
        let node = std::mem::size_of::<FreeListNode>() as u64;
        (total_size / node).max(1) as usize
    }

    /// Create a list covering `[0, total_size)` with the default node pool.
    pub fn new(total_size: u64) -> Self {
        Self::with_node_capacity(total_size, Self::node_capacity_for(total_size))
    }

    /// Create a list covering `[0, total_size)` with exactly `node_capacity` pool nodes.
    pub fn with_node_capacity(total_size: u64, node_capacity: usize) -> Self {
        let mut list = Self {
            total_size,
            nodes: vec![None; node_capacity.max(1)],
            head: None,
        };
        list.clear();
        list
    }

    /// Mark the whole range free again.
    pub fn clear(&mut self) {
        self.nodes.iter_mut().for_each(|slot| *slot = None);
        self.head = None;
        if self.total_size > 0 {
            self.nodes[0] = Some(FreeListNode {
                offset: 0,
                size: self.total_size,
                prev: None,
                next: None,
            });
            self.head = Some(0);
        }
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[inline]
    pub fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn active_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Sum of all free ranges.
    pub fn free_space(&self) -> u64 {
        self.free_ranges().map(|(_, size)| size).sum()
    }

    /// Free ranges as `(offset, size)` in ascending offset order.
    pub fn free_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.node(idx);
            cursor = node.next;
            Some((node.offset, node.size))
        })
    }

    /// Reserve `size` bytes from the first range large enough, returning its offset.
    pub fn alloc(&mut self, size: u64) -> Result<u64, FreeListError> {
        if size == 0 {
            return Err(FreeListError::InvalidSize);
        }

        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = *self.node(idx);
            if node.size == size {
                self.unlink(idx);
                return Ok(node.offset);
            }
            if node.size > size {
                let node = self.node_mut(idx);
                node.offset += size;
                node.size -= size;
                return Ok(node.offset - size);
            }
            cursor = node.next;
        }

        let free = self.free_space();
        tracing::debug!(requested = size, free, "free list has no range large enough");
        Err(FreeListError::OutOfSpace {
            requested: size,
            free,
        })
    }

    /// Return `size` bytes at `offset` to the list, merging with neighbours.
    pub fn free(&mut self, size: u64, offset: u64) -> Result<(), FreeListError> {
        if size == 0 {
            return Err(FreeListError::InvalidSize);
        }
        let invalid = FreeListError::InvalidRange {
            offset,
            size,
            total: self.total_size,
        };
        let end = offset.checked_add(size).ok_or_else(|| invalid.clone())?;
        if end > self.total_size {
            return Err(invalid);
        }

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = *self.node(idx);
            if node.offset == offset {
                // Extend the node that already starts here. The grown range
                // must stay clear of the next node and the end of the list.
                let grown_end = node.offset + node.size + size;
                let limit = node.next.map_or(self.total_size, |n| self.node(n).offset);
                if grown_end > limit {
                    tracing::warn!(offset, size, "free of a range that is already free");
                    return Err(invalid);
                }
                self.node_mut(idx).size += size;
                self.merge_with_next(idx);
                return Ok(());
            }
            if node.offset > offset {
                break;
            }
            prev = Some(idx);
            cursor = node.next;
        }

        let overlaps_prev = prev.is_some_and(|p| {
            let p = self.node(p);
            p.offset + p.size > offset
        });
        let overlaps_next = cursor.is_some_and(|n| end > self.node(n).offset);
        if overlaps_prev || overlaps_next {
            tracing::warn!(offset, size, "free of a range that is already free");
            return Err(invalid);
        }

        let Some(new_idx) = self.nodes.iter().position(Option::is_none) else {
            tracing::warn!(
                capacity = self.nodes.len(),
                offset,
                size,
                "free-list node pool exhausted"
            );
            return Err(FreeListError::NodePoolExhausted {
                capacity: self.nodes.len(),
            });
        };

        self.nodes[new_idx] = Some(FreeListNode {
            offset,
            size,
            prev,
            next: cursor,
        });
        match prev {
            Some(p) => self.node_mut(p).next = Some(new_idx),
            None => self.head = Some(new_idx),
        }
        if let Some(n) = cursor {
            self.node_mut(n).prev = Some(new_idx);
        }

        self.merge_with_next(new_idx);
        if let Some(p) = prev {
            self.merge_with_next(p);
        }
        Ok(())
    }

    /// Grow the managed range to `new_total_size`, rebuilding the node pool at
    /// the matching capacity. The new tail `[old_total, new_total)` becomes free.
    ///
    /// On error the list is left unchanged.
    pub fn resize(&mut self, new_total_size: u64) -> Result<(), FreeListError> {
        if new_total_size < self.total_size {
            return Err(FreeListError::ShrinkNotSupported {
                current: self.total_size,
                requested: new_total_size,
            });
        }
        if new_total_size == self.total_size {
            return Ok(());
        }

        let capacity = Self::node_capacity_for(new_total_size).max(self.nodes.len());
        let mut ranges: Vec<(u64, u64)> = self.free_ranges().collect();
        let old_total = self.total_size;
        let tail = new_total_size - old_total;
        match ranges.last_mut() {
            Some((offset, size)) if *offset + *size == old_total => *size += tail,
            _ => ranges.push((old_total, tail)),
        }
        if ranges.len() > capacity {
            return Err(FreeListError::NodePoolExhausted { capacity });
        }

        let mut nodes = vec![None; capacity];
        let last = ranges.len().saturating_sub(1);
        for (idx, &(offset, size)) in ranges.iter().enumerate() {
            nodes[idx] = Some(FreeListNode {
                offset,
                size,
                prev: idx.checked_sub(1),
                next: (idx < last).then_some(idx + 1),
            });
        }

        self.nodes = nodes;
        self.head = (!ranges.is_empty()).then_some(0);
        self.total_size = new_total_size;
        tracing::debug!(
            from = old_total,
            to = new_total_size,
            nodes = capacity,
            "free list resized"
        );
        Ok(())
    }

    fn node(&self, idx: usize) -> &FreeListNode {
        self.nodes[idx]
            .as_ref()
            .expect("linked free-list node must be live")
    }

    fn node_mut(&mut self, idx: usize) -> &mut FreeListNode {
        self.nodes[idx]
            .as_mut()
            .expect("linked free-list node must be live")
    }

    /// Detach a node from the list and return it to the pool.
    fn unlink(&mut self, idx: usize) {
        let FreeListNode { prev, next, .. } = *self.node(idx);
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        self.nodes[idx] = None;
    }

    /// Absorb the next node if it starts exactly where `idx` ends.
    fn merge_with_next(&mut self, idx: usize) {
        let node = *self.node(idx);
        let Some(next_idx) = node.next else {
            return;
        };
        let next = *self.node(next_idx);
        if node.offset + node.size == next.offset {
            self.node_mut(idx).size += next.size;
            self.unlink(next_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_well_formed(list: &FreeList) {
        let ranges: Vec<_> = list.free_ranges().collect();
        for pair in ranges.windows(2) {
            let (a_off, a_size) = pair[0];
            let (b_off, _) = pair[1];
            assert!(a_off + a_size < b_off, "ranges {pair:?} touch or overlap");
        }
        assert_eq!(ranges.len(), list.active_node_count());
    }

    #[test]
    fn exact_fit_reuses_freed_range() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.alloc(64), Ok(0));
        assert_eq!(list.alloc(64), Ok(64));
        list.free(64, 0).unwrap();
        assert_eq!(list.alloc(64), Ok(0));
        assert_well_formed(&list);
    }

    #[test]
    fn freed_middle_range_is_found_again() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.alloc(64), Ok(0));
        assert_eq!(list.alloc(128), Ok(64));
        assert_eq!(list.alloc(256), Ok(192));

        list.free(128, 64).unwrap();
        assert_eq!(list.alloc(128), Ok(64));
    }

    #[test]
    fn freeing_everything_coalesces_into_one_range() {
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let blocks = [(64u64, 0u64), (128, 64), (256, 192)];

        for order in orders {
            let mut list = FreeList::new(1024);
            for &(size, offset) in &blocks {
                assert_eq!(list.alloc(size), Ok(offset));
            }
            for i in order {
                let (size, offset) = blocks[i];
                list.free(size, offset).unwrap();
                assert_well_formed(&list);
            }
            assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(0, 1024)]);
            assert_eq!(list.alloc(1024), Ok(0));
            assert!(matches!(
                list.alloc(1),
                Err(FreeListError::OutOfSpace { requested: 1, free: 0 })
            ));
        }
    }

    #[test]
    fn first_fit_skips_small_ranges() {
        let mut list = FreeList::new(1000);
        let a = list.alloc(100).unwrap();
        let _b = list.alloc(100).unwrap();
        list.free(100, a).unwrap();
        // The 100 byte hole at the front is too small.
        assert_eq!(list.alloc(150), Ok(200));
    }

    #[test]
    fn free_at_existing_node_start_grows_that_node() {
        let mut list = FreeList::new(512);
        list.alloc(512).unwrap();
        list.free(64, 128).unwrap();
        list.free(32, 128).unwrap();
        assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(128, 96)]);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut list = FreeList::new(64);
        assert_eq!(list.alloc(0), Err(FreeListError::InvalidSize));
        assert_eq!(list.free(0, 0), Err(FreeListError::InvalidSize));
    }

    #[test]
    fn out_of_bounds_and_overlapping_frees_are_rejected() {
        let mut list = FreeList::new(256);
        list.alloc(128).unwrap();
        assert!(matches!(
            list.free(64, 240),
            Err(FreeListError::InvalidRange { .. })
        ));
        // [128, 256) is already free.
        assert!(matches!(
            list.free(32, 160),
            Err(FreeListError::InvalidRange { .. })
        ));
        assert!(matches!(
            list.free(64, 100),
            Err(FreeListError::InvalidRange { .. })
        ));
        assert_eq!(list.free_space(), 128);
    }

    #[test]
    fn growing_a_free_node_into_its_neighbour_is_rejected() {
        let mut list = FreeList::new(512);
        assert_eq!(list.alloc(512), Ok(0));
        list.free(32, 128).unwrap();
        list.free(32, 192).unwrap();

        // Would grow [128, 160) to [128, 256), swallowing [192, 224).
        assert!(matches!(
            list.free(96, 128),
            Err(FreeListError::InvalidRange { .. })
        ));
        // Would grow [192, 224) past the end of the list.
        assert!(matches!(
            list.free(320, 192),
            Err(FreeListError::InvalidRange { .. })
        ));
        assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(128, 32), (192, 32)]);
        assert_eq!(list.free_space(), 64);

        // Growing up to the neighbour exactly merges the two.
        list.free(32, 128).unwrap();
        assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(128, 96)]);
    }

    #[test]
    fn exhausted_node_pool_fails_the_free() {
        let mut list = FreeList::with_node_capacity(1024, 2);
        for i in 0..8 {
            assert_eq!(list.alloc(128), Ok(i * 128));
        }
        list.free(128, 0).unwrap();
        list.free(128, 256).unwrap();
        assert_eq!(
            list.free(128, 512),
            Err(FreeListError::NodePoolExhausted { capacity: 2 })
        );
        assert_eq!(list.free_space(), 256);
    }

    #[test]
    fn resize_appends_tail_to_trailing_free_range() {
        let mut list = FreeList::new(256);
        list.alloc(64).unwrap();
        list.resize(512).unwrap();
        assert_eq!(list.total_size(), 512);
        assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(64, 448)]);
        assert_eq!(list.node_capacity(), FreeList::node_capacity_for(512));
    }

    #[test]
    fn resize_of_full_list_adds_a_new_range() {
        let mut list = FreeList::new(256);
        list.alloc(256).unwrap();
        list.resize(1024).unwrap();
        assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(256, 768)]);
        assert_eq!(list.alloc(768), Ok(256));
    }

    #[test]
    fn resize_keeps_interior_holes() {
        let mut list = FreeList::new(512);
        for _ in 0..4 {
            list.alloc(128).unwrap();
        }
        list.free(128, 128).unwrap();
        list.resize(1024).unwrap();
        assert_eq!(
            list.free_ranges().collect::<Vec<_>>(),
            vec![(128, 128), (512, 512)]
        );
        assert_well_formed(&list);
    }

    #[test]
    fn shrinking_is_refused() {
        let mut list = FreeList::new(512);
        assert_eq!(
            list.resize(256),
            Err(FreeListError::ShrinkNotSupported {
                current: 512,
                requested: 256
            })
        );
    }

    proptest! {
        #[test]
        fn random_alloc_free_keeps_list_consistent(
            ops in proptest::collection::vec((1u64..200, any::<bool>()), 1..80)
        ) {
            let total = 4096;
            let mut list = FreeList::new(total);
            let mut live: Vec<(u64, u64)> = Vec::new();

            for (size, do_free) in ops {
                if do_free && !live.is_empty() {
                    let (offset, size) = live.remove(live.len() / 2);
                    prop_assert!(list.free(size, offset).is_ok());
                } else if let Ok(offset) = list.alloc(size) {
                    prop_assert!(offset + size <= total);
                    live.push((offset, size));
                }

                let used: u64 = live.iter().map(|&(_, s)| s).sum();
                prop_assert_eq!(list.free_space() + used, total);
                assert_well_formed(&list);
            }

            for (offset, size) in live.drain(..) {
                prop_assert!(list.free(size, offset).is_ok());
            }
            prop_assert_eq!(list.free_ranges().collect::<Vec<_>>(), vec![(0, total)]);
        }
    }
}
