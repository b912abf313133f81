//! Top-level allocator: routes requests between the slab pools and the
//! fallback store.
//!
//! All state lives in one owned [`SlabAllocator`] value. Every mutating
//! operation takes `&mut self`; there is no internal locking. Share one
//! allocator between threads only behind an external lock.
//!
//! Memory reserved for slabs is never returned to the backing allocator
//! while the `SlabAllocator` is alive, even when every cell is free. This is
//! accepted fragmentation: a burst of small allocations pins its slabs until
//! teardown.

use crate::fallback::FallbackStore;
use crate::fault::{Fault, fatal};
use crate::pool::SlabPool;
use crate::range_index::RangeIndex;
use crate::size_class::{self, MAX_SLABS_PER_CLASS, MIN_CELL_LOG2, NUM_SLAB_CLASSES};
use core::alloc::GlobalAlloc;
use core::ptr::{self, NonNull};
use std::alloc::System;
use tracing::debug;

/// Runtime knobs. Everything else is a compile-time constant in
/// [`size_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabConfig {
    /// Slabs a single class may create before it starts delegating.
    /// Clamped to [`MAX_SLABS_PER_CLASS`].
    pub max_slabs_per_class: usize,
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            max_slabs_per_class: MAX_SLABS_PER_CLASS,
        }
    }
}

impl SlabConfig {
    pub fn with_max_slabs_per_class(mut self, max: usize) -> Self {
        self.max_slabs_per_class = max.min(MAX_SLABS_PER_CLASS);
        self
    }
}

/// Occupancy of one slab-backed class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
    pub log2: u32,
    pub cell_size: usize,
    pub slabs: usize,
    /// Cells across all slabs of the class.
    pub capacity: usize,
    pub live_cells: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlabStats {
    pub classes: Vec<ClassStats>,
    /// Bytes reserved for slabs.
    pub slab_bytes: usize,
    /// Bytes handed out from slabs.
    pub live_slab_bytes: usize,
    pub fallback_allocations: usize,
    pub fallback_bytes: usize,
}

/// Power-of-two slab allocator over a backing [`GlobalAlloc`].
///
/// ```
/// let mut slabs = slabby::SlabAllocator::new();
/// let p = slabs.alloc(10);
/// unsafe { slabs.free(p) };
/// assert_eq!(slabs.alloc(16), p);
/// ```
pub struct SlabAllocator<A: GlobalAlloc = System> {
    backing: A,
    config: SlabConfig,
    pools: [SlabPool; NUM_SLAB_CLASSES],
    ranges: RangeIndex,
    fallback: FallbackStore,
}

// SAFETY: every pointer held here refers to memory owned by this value alone;
// nothing is shared with other allocators or threads.
unsafe impl<A: GlobalAlloc + Send> Send for SlabAllocator<A> {}

impl SlabAllocator<System> {
    pub fn new() -> Self {
        Self::with_backing(System)
    }
}

impl Default for SlabAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: GlobalAlloc> SlabAllocator<A> {
    pub fn with_backing(backing: A) -> Self {
        Self::with_config(backing, SlabConfig::default())
    }

    pub fn with_config(backing: A, config: SlabConfig) -> Self {
        let config = config.with_max_slabs_per_class(config.max_slabs_per_class);
        Self {
            backing,
            config,
            pools: core::array::from_fn(|i| SlabPool::new(size_class::class_log2(i))),
            ranges: RangeIndex::default(),
            fallback: FallbackStore::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> SlabConfig {
        self.config
    }

    #[inline]
    pub fn backing(&self) -> &A {
        &self.backing
    }

    /// Allocate at least `size` bytes. Zero is fatal.
    #[inline]
    pub fn alloc(&mut self, size: usize) -> NonNull<u8> {
        self.alloc_log2(size_class::classify(size))
    }

    /// Allocate one block of class `log2` (`2^log2` bytes, at least 16).
    pub fn alloc_log2(&mut self, log2: u32) -> NonNull<u8> {
        let log2 = log2.max(MIN_CELL_LOG2);
        if !size_class::is_slab_class(log2) {
            return self.fallback.alloc(&self.backing, log2);
        }

        let pool = &mut self.pools[size_class::class_index(log2)];
        match pool.alloc(&self.backing, &mut self.ranges, self.config.max_slabs_per_class) {
            Some(p) => p,
            None => {
                debug!(
                    cell_size = size_class::class_to_size(log2),
                    slabs = pool.slab_count(),
                    "slab quota exhausted, delegating"
                );
                self.fallback.alloc(&self.backing, log2)
            }
        }
    }

    /// Allocate at least `size` zeroed bytes.
    pub fn calloc(&mut self, size: usize) -> NonNull<u8> {
        self.calloc_log2(size_class::classify(size))
    }

    pub fn calloc_log2(&mut self, log2: u32) -> NonNull<u8> {
        let log2 = log2.max(MIN_CELL_LOG2);
        let p = self.alloc_log2(log2);
        // SAFETY: the block just handed out spans the whole class.
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size_class::class_to_size(log2)) };
        p
    }

    /// Return a block to the allocator.
    ///
    /// A pointer this allocator never handed out, an interior pointer, or a
    /// second free of the same block is fatal.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and must not be used
    /// after this call.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        match self.ranges.find_owner(addr) {
            Some(owner) => self.pools[owner.class_index]
                .slab_mut(owner.slab_index)
                .release(ptr),
            None => unsafe { self.fallback.free(&self.backing, ptr) },
        }
    }

    /// Resize a block.
    ///
    /// `ptr` is checked the way [`SlabAllocator::free`] checks it before
    /// anything is returned or copied. When the new size rounds to the
    /// block's current class the pointer is returned unchanged, even for
    /// fallback blocks that could shrink. Otherwise the contents move to a
    /// fresh block and the old one is freed.
    ///
    /// # Safety
    ///
    /// Same contract as [`SlabAllocator::free`] for `ptr`.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, new_size: usize) -> NonNull<u8> {
        let addr = ptr.as_ptr() as usize;
        let old_log2 = match self.ranges.find_owner(addr) {
            Some(owner) => {
                self.pools[owner.class_index].slabs()[owner.slab_index].check_live(ptr);
                owner.log2()
            }
            None => match self.fallback.find(addr) {
                Some(entry) => entry.log2,
                None => fatal(Fault::UnknownPointer(addr)),
            },
        };
        let new_log2 = size_class::classify(new_size);
        if new_log2 == old_log2 {
            return ptr;
        }

        let new = self.alloc_log2(new_log2);
        let len = size_class::class_to_size(old_log2.min(new_log2));
        // SAFETY: both blocks are live, distinct, and at least `len` long.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), len);
            self.free(ptr);
        }
        new
    }

    /// Class of a live block, slab or fallback.
    fn class_of(&self, addr: usize) -> Option<u32> {
        match self.ranges.find_owner(addr) {
            Some(owner) => Some(owner.log2()),
            None => self.fallback.find(addr).map(|e| e.log2),
        }
    }

    /// Bytes usable at `ptr`: the full cell or fallback block.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let addr = ptr.as_ptr() as usize;
        match self.class_of(addr) {
            Some(log2) => size_class::class_to_size(log2),
            None => fatal(Fault::UnknownPointer(addr)),
        }
    }

    /// Whether `ptr` points into one of this allocator's slabs.
    pub fn is_slab_owned(&self, ptr: NonNull<u8>) -> bool {
        self.ranges.find_owner(ptr.as_ptr() as usize).is_some()
    }

    /// Whether `ptr` is a live fallback block.
    pub fn is_fallback_owned(&self, ptr: NonNull<u8>) -> bool {
        self.fallback.find(ptr.as_ptr() as usize).is_some()
    }

    /// Whether a request of `size` bytes would be served from a slab.
    pub fn can_alloc(&self, size: usize) -> bool {
        self.can_alloc_log2(size_class::classify(size))
    }

    pub fn can_alloc_log2(&self, log2: u32) -> bool {
        let log2 = log2.max(MIN_CELL_LOG2);
        size_class::is_slab_class(log2)
            && self.pools[size_class::class_index(log2)].has_room(self.config.max_slabs_per_class)
    }

    /// Slabs created for class `log2`. Zero for classes that are not
    /// slab-backed.
    pub fn slab_count(&self, log2: u32) -> usize {
        if size_class::is_slab_class(log2) {
            self.pools[size_class::class_index(log2)].slab_count()
        } else {
            0
        }
    }

    /// Live fallback blocks.
    pub fn fallback_len(&self) -> usize {
        self.fallback.len()
    }

    pub fn stats(&self) -> SlabStats {
        let mut stats = SlabStats::default();
        for pool in &self.pools {
            let cell_size = size_class::class_to_size(pool.log2());
            let class = ClassStats {
                log2: pool.log2(),
                cell_size,
                slabs: pool.slab_count(),
                capacity: pool.slab_count() * size_class::cells_per_slab(pool.log2()),
                live_cells: pool.live_cells(),
            };
            stats.slab_bytes += class.slabs * size_class::SLAB_SPAN;
            stats.live_slab_bytes += class.live_cells * cell_size;
            stats.classes.push(class);
        }
        stats.fallback_allocations = self.fallback.len();
        stats.fallback_bytes = self.fallback.bytes();
        stats
    }

    /// Audit every invariant without aborting.
    ///
    /// Walks every free list, so it is O(total cells).
    pub fn verify(&self) -> Result<(), Fault> {
        self.ranges.check()?;
        self.fallback.check()?;

        let mut slabs = 0;
        for pool in &self.pools {
            for slab in pool.slabs() {
                slab.check()?;
                slabs += 1;
            }
        }
        if slabs != self.ranges.len() {
            return Err(Fault::Corrupted(format!(
                "{} slabs but {} address ranges",
                slabs,
                self.ranges.len()
            )));
        }

        for entry in self.ranges.iter() {
            let slab = self
                .pools
                .get(entry.class_index)
                .and_then(|pool| pool.slabs().get(entry.slab_index));
            match slab {
                Some(slab) if slab.addr() == entry.base => {}
                _ => {
                    return Err(Fault::Corrupted(format!(
                        "range {:#x} does not match slab {} of class {}",
                        entry.base,
                        entry.slab_index,
                        entry.log2()
                    )));
                }
            }
        }

        if let Some(entry) = self
            .fallback
            .iter()
            .find(|e| self.ranges.find_owner(e.addr()).is_some())
        {
            return Err(Fault::Corrupted(format!(
                "fallback block {:#x} lies inside a slab",
                entry.addr()
            )));
        }
        Ok(())
    }
}

impl<A: GlobalAlloc> Drop for SlabAllocator<A> {
    fn drop(&mut self) {
        // SAFETY: teardown; every block came from `self.backing`.
        unsafe {
            for pool in &mut self.pools {
                pool.release_all(&self.backing);
            }
            self.fallback.release_all(&self.backing);
        }
    }
}
