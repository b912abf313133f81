//! Per-class slab pool.
//!
//! A pool owns every slab of one size class. Allocation tries the slab that
//! served the previous request, then scans all slabs, then grows by one slab.
//! Growth stops at the configured quota, at which point the caller delegates
//! to the fallback store. Slabs are never removed before teardown.

use crate::range_index::{RangeEntry, RangeIndex};
use crate::size_class;
use crate::slab::{SLAB_LAYOUT, Slab};
use core::alloc::GlobalAlloc;
use core::ptr::NonNull;
use std::alloc::handle_alloc_error;
use tracing::debug;

pub struct SlabPool {
    log2: u32,
    /// Slab that served the last allocation.
    last_used: usize,
    slabs: Vec<Slab>,
}

impl SlabPool {
    pub fn new(log2: u32) -> Self {
        Self {
            log2,
            last_used: 0,
            slabs: Vec::new(),
        }
    }

    #[inline]
    pub fn log2(&self) -> u32 {
        self.log2
    }

    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    #[inline]
    pub fn slabs(&self) -> &[Slab] {
        &self.slabs
    }

    #[inline]
    pub fn slab_mut(&mut self, index: usize) -> &mut Slab {
        &mut self.slabs[index]
    }

    pub fn live_cells(&self) -> usize {
        self.slabs.iter().map(Slab::allocated).sum()
    }

    /// Whether an allocation would succeed without delegation.
    pub fn has_room(&self, max_slabs: usize) -> bool {
        self.slabs.len() < max_slabs || self.slabs.iter().any(|s| !s.is_full())
    }

    /// Allocate from an existing slab: last used first, then a linear scan.
    #[inline]
    pub fn try_alloc(&mut self) -> Option<NonNull<u8>> {
        if let Some(p) = self
            .slabs
            .get_mut(self.last_used)
            .and_then(Slab::try_alloc)
        {
            return Some(p);
        }
        self.try_alloc_scan()
    }

    #[cold]
    fn try_alloc_scan(&mut self) -> Option<NonNull<u8>> {
        for (index, slab) in self.slabs.iter_mut().enumerate() {
            if let Some(p) = slab.try_alloc() {
                self.last_used = index;
                return Some(p);
            }
        }
        None
    }

    /// Allocate a cell, growing the pool if every slab is full.
    ///
    /// Returns `None` only when the pool already holds `max_slabs` slabs.
    pub fn alloc<A: GlobalAlloc>(
        &mut self,
        backing: &A,
        ranges: &mut RangeIndex,
        max_slabs: usize,
    ) -> Option<NonNull<u8>> {
        if let Some(p) = self.try_alloc() {
            return Some(p);
        }
        let index = self.grow(backing, ranges, max_slabs)?;
        self.slabs[index].try_alloc()
    }

    /// Reserve one more slab and register its address range.
    ///
    /// The pool is left untouched unless every step succeeds. Backing
    /// exhaustion does not return.
    pub fn grow<A: GlobalAlloc>(
        &mut self,
        backing: &A,
        ranges: &mut RangeIndex,
        max_slabs: usize,
    ) -> Option<usize> {
        if self.slabs.len() >= max_slabs {
            return None;
        }

        // SAFETY: SLAB_LAYOUT has a non-zero size.
        let raw = unsafe { backing.alloc(SLAB_LAYOUT) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(SLAB_LAYOUT);
        };
        let slab = Slab::new(base, self.log2);
        let index = self.slabs.len();

        ranges.insert(RangeEntry {
            base: slab.addr(),
            class_index: size_class::class_index(self.log2),
            slab_index: index,
        });

        debug!(
            cell_size = size_class::class_to_size(self.log2),
            slab = index,
            base = format_args!("{:#x}", slab.addr()),
            cells = slab.capacity(),
            "created slab"
        );

        self.slabs.push(slab);
        self.last_used = index;
        Some(index)
    }

    /// Hand every slab back to the backing allocator.
    ///
    /// # Safety
    ///
    /// No pointer into these slabs may be used afterwards, and `backing` must
    /// be the allocator that reserved them.
    pub(crate) unsafe fn release_all<A: GlobalAlloc>(&mut self, backing: &A) {
        for slab in self.slabs.drain(..) {
            unsafe { backing.dealloc(slab.base().as_ptr(), SLAB_LAYOUT) };
        }
        self.last_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::System;

    fn pool_with(log2: u32) -> (SlabPool, RangeIndex) {
        (SlabPool::new(log2), RangeIndex::default())
    }

    #[test]
    fn test_first_alloc_grows_one_slab() {
        let (mut pool, mut ranges) = pool_with(8);
        assert_eq!(pool.slab_count(), 0);
        assert!(pool.try_alloc().is_none());

        let p = pool.alloc(&System, &mut ranges, 4).unwrap();
        assert_eq!(pool.slab_count(), 1);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges.find_owner(p.as_ptr() as usize).unwrap().slab_index, 0);

        unsafe { pool.release_all(&System) };
    }

    #[test]
    fn test_growth_boundary() {
        let (mut pool, mut ranges) = pool_with(size_class::MAX_SLAB_CELL_LOG2);
        let capacity = size_class::cells_per_slab(pool.log2());
        for _ in 0..capacity {
            pool.alloc(&System, &mut ranges, 4).unwrap();
        }
        assert_eq!(pool.slab_count(), 1);

        pool.alloc(&System, &mut ranges, 4).unwrap();
        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.live_cells(), capacity + 1);

        unsafe { pool.release_all(&System) };
    }

    #[test]
    fn test_quota_stops_growth() {
        let (mut pool, mut ranges) = pool_with(size_class::MAX_SLAB_CELL_LOG2);
        let capacity = size_class::cells_per_slab(pool.log2());
        for _ in 0..2 * capacity {
            pool.alloc(&System, &mut ranges, 2).unwrap();
        }
        assert!(!pool.has_room(2));
        assert!(pool.alloc(&System, &mut ranges, 2).is_none());
        assert_eq!(pool.slab_count(), 2);
        assert_eq!(ranges.len(), 2);

        unsafe { pool.release_all(&System) };
    }

    #[test]
    fn test_scan_finds_room_in_earlier_slab() {
        let (mut pool, mut ranges) = pool_with(size_class::MAX_SLAB_CELL_LOG2);
        let capacity = size_class::cells_per_slab(pool.log2());
        let first: Vec<_> = (0..capacity)
            .map(|_| pool.alloc(&System, &mut ranges, 4).unwrap())
            .collect();
        pool.alloc(&System, &mut ranges, 4).unwrap();
        assert_eq!(pool.last_used, 1);

        pool.slab_mut(0).release(first[3]);
        for _ in 0..capacity - 1 {
            pool.alloc(&System, &mut ranges, 4).unwrap();
        }
        // Second slab is now full, so the scan lands back on the freed cell.
        assert_eq!(pool.alloc(&System, &mut ranges, 4).unwrap(), first[3]);
        assert_eq!(pool.last_used, 0);
        assert_eq!(pool.slab_count(), 2);

        unsafe { pool.release_all(&System) };
    }

    #[test]
    fn test_zero_quota_never_grows() {
        let (mut pool, mut ranges) = pool_with(4);
        assert!(!pool.has_room(0));
        assert!(pool.alloc(&System, &mut ranges, 0).is_none());
        assert!(ranges.is_empty());
    }
}
