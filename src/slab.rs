//! Slab: one 1 MiB span split into equal cells, with a LIFO free list.
//!
//! There is no per-cell header. The free list is a separate array of cell
//! indices used as a stack: `free[..n_allocated]` is scratch, and
//! `free[n_allocated..]` holds exactly the unused cells, each once.
//!
//! ```text
//!            n_allocated
//!                 v
//! free: [ 3  0  1 | 2  4  5  6 ... ]
//!        (stale)    (free cells, next handed out first)
//! ```

use crate::fault::{Fault, fatal};
use crate::size_class::{self, CellIndex, MAX_SLAB_CELL_LOG2, SLAB_SPAN};
use core::alloc::Layout;
use core::ptr::NonNull;

/// Slabs are aligned to the largest slab cell, so every cell is aligned to
/// its own size.
pub const SLAB_ALIGN: usize = size_class::class_to_size(MAX_SLAB_CELL_LOG2);

const _: () = assert!(SLAB_ALIGN.is_power_of_two() && SLAB_ALIGN <= SLAB_SPAN);

/// Layout requested from the backing allocator for every slab.
// SAFETY: SLAB_ALIGN is a power of two no larger than SLAB_SPAN (checked above).
pub const SLAB_LAYOUT: Layout =
    unsafe { Layout::from_size_align_unchecked(SLAB_SPAN, SLAB_ALIGN) };

pub struct Slab {
    base: NonNull<u8>,
    log2: u32,
    n_allocated: usize,
    free: Box<[CellIndex]>,
}

impl Slab {
    /// Wrap a freshly reserved span. The free list starts as the identity
    /// permutation so cells are handed out in address order.
    pub(crate) fn new(base: NonNull<u8>, log2: u32) -> Self {
        let capacity = size_class::cells_per_slab(log2);
        let free = (0..capacity).map(|i| i as CellIndex).collect();
        Self {
            base,
            log2,
            n_allocated: 0,
            free,
        }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn log2(&self) -> u32 {
        self.log2
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.free.len()
    }

    /// Number of live cells.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.n_allocated
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.n_allocated == self.free.len()
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr.wrapping_sub(self.addr()) < SLAB_SPAN
    }

    /// Pop the most recently freed cell, or `None` when every cell is live.
    #[inline]
    pub fn try_alloc(&mut self) -> Option<NonNull<u8>> {
        if self.is_full() {
            return None;
        }
        let index = self.free[self.n_allocated] as usize;
        self.n_allocated += 1;
        // SAFETY: index < capacity, so the cell lies inside the span.
        Some(unsafe { self.base.add(index << self.log2) })
    }

    /// Push a cell back onto the free list.
    ///
    /// The caller has already established that `ptr` falls inside this slab.
    /// Interior pointers and frees into an idle slab are fatal.
    pub fn release(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let index = self.cell_index(addr);
        self.n_allocated -= 1;
        self.free[self.n_allocated] = index as CellIndex;

        check_released(self, addr, index);
    }

    /// Assert that `ptr` is a live cell of this slab without changing it.
    ///
    /// Same faults as [`Slab::release`]; a cell still on the free list is
    /// caught by the paranoid scan.
    pub fn check_live(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let index = self.cell_index(addr);
        check_not_free(self, addr, index);
    }

    /// Index of the cell starting at `addr`. Interior pointers and pointers
    /// into an idle slab are fatal.
    fn cell_index(&self, addr: usize) -> usize {
        debug_assert!(self.contains(addr));

        let offset = addr - self.addr();
        let cell = size_class::class_to_size(self.log2);
        if offset & (cell - 1) != 0 {
            fatal(Fault::MisalignedFree { addr, offset, cell });
        }
        if self.n_allocated == 0 {
            fatal(Fault::FreeOfIdleCell(addr));
        }
        offset >> self.log2
    }

    /// Confirm the free tail is a set of distinct, in-range cell indices.
    pub(crate) fn check(&self) -> Result<(), Fault> {
        let capacity = self.capacity();
        if self.n_allocated > capacity {
            return Err(Fault::Corrupted(format!(
                "slab {:#x} has {} live cells but only {} slots",
                self.addr(),
                self.n_allocated,
                capacity
            )));
        }
        let mut seen = vec![false; capacity];
        for &index in &self.free[self.n_allocated..] {
            let index = index as usize;
            if index >= capacity {
                return Err(Fault::Corrupted(format!(
                    "slab {:#x} free list holds out-of-range cell {}",
                    self.addr(),
                    index
                )));
            }
            if core::mem::replace(&mut seen[index], true) {
                return Err(Fault::DoubleFree {
                    addr: self.addr() + (index << self.log2),
                    index,
                    count: occurrences(self, index),
                });
            }
        }
        Ok(())
    }
}

fn occurrences(slab: &Slab, index: usize) -> usize {
    slab.free[slab.n_allocated..]
        .iter()
        .filter(|&&i| i as usize == index)
        .count()
}

cfg_if::cfg_if! {
    if #[cfg(any(debug_assertions, feature = "paranoid"))] {
        /// O(capacity) scan: a freed cell must now appear exactly once.
        #[inline]
        fn check_released(slab: &Slab, addr: usize, index: usize) {
            let count = occurrences(slab, index);
            if count != 1 {
                fatal(Fault::DoubleFree { addr, index, count });
            }
        }

        #[inline]
        fn check_not_free(slab: &Slab, addr: usize, index: usize) {
            if occurrences(slab, index) != 0 {
                fatal(Fault::StaleCell { addr, index });
            }
        }
    } else {
        #[inline(always)]
        fn check_released(_slab: &Slab, _addr: usize, _index: usize) {}

        #[inline(always)]
        fn check_not_free(_slab: &Slab, _addr: usize, _index: usize) {}
    }
}
