//! Size class table and lookup functions.
//!
//! Every request is rounded up to a power of two. Classes are named by that
//! power (`log2`). Classes from `MIN_CELL_LOG2` up to (but excluding)
//! `SLAB_LIMIT_LOG2` are served from slabs, anything larger is delegated to
//! the backing allocator.

use crate::fault::{Fault, fatal};

/// Smallest cell: 16 bytes. Smaller requests are rounded up to it.
pub const MIN_CELL_LOG2: u32 = 4;

/// First class that is NOT slab-backed (64 KiB and above go to fallback).
pub const SLAB_LIMIT_LOG2: u32 = 16;

/// Largest slab-backed class: 32 KiB.
pub const MAX_SLAB_CELL_LOG2: u32 = SLAB_LIMIT_LOG2 - 1;

/// Every slab spans 1 MiB regardless of its class.
pub const SLAB_SPAN_LOG2: u32 = 20;
pub const SLAB_SPAN: usize = 1 << SLAB_SPAN_LOG2;

/// Default per-class slab quota.
pub const MAX_SLABS_PER_CLASS: usize = 256;

/// Number of slab-backed size classes.
pub const NUM_SLAB_CLASSES: usize = (SLAB_LIMIT_LOG2 - MIN_CELL_LOG2) as usize;

/// Free-list entries are `u16`, so a slab may hold at most 2^16 cells.
pub type CellIndex = u16;

const _: () = assert!(SLAB_SPAN_LOG2 - MIN_CELL_LOG2 <= CellIndex::BITS);
const _: () = assert!(MAX_SLAB_CELL_LOG2 < SLAB_SPAN_LOG2);
const _: () = assert!(MIN_CELL_LOG2 < SLAB_LIMIT_LOG2);

/// Round a byte size up to its class.
///
/// Sizes below 16 bytes land in the 16-byte class. Zero is not a valid size.
#[inline]
pub fn classify(size: usize) -> u32 {
    if size == 0 {
        fatal(Fault::ZeroSize);
    }
    match size.checked_next_power_of_two() {
        Some(rounded) => rounded.trailing_zeros().max(MIN_CELL_LOG2),
        None => fatal(Fault::SizeOverflow(size)),
    }
}

/// Whether a class is served from slabs.
#[inline]
pub const fn is_slab_class(log2: u32) -> bool {
    log2 >= MIN_CELL_LOG2 && log2 < SLAB_LIMIT_LOG2
}

/// Pool index for a slab-backed class. Fatal outside the slab range.
#[inline]
pub fn class_index(log2: u32) -> usize {
    if !is_slab_class(log2) {
        fatal(Fault::ClassOutOfRange(log2));
    }
    (log2 - MIN_CELL_LOG2) as usize
}

/// Inverse of [`class_index`].
#[inline]
pub const fn class_log2(index: usize) -> u32 {
    index as u32 + MIN_CELL_LOG2
}

/// Cell size in bytes for a class.
#[inline]
pub const fn class_to_size(log2: u32) -> usize {
    1 << log2
}

/// Number of cells in one slab of the given class.
#[inline]
pub const fn cells_per_slab(log2: u32) -> usize {
    1 << (SLAB_SPAN_LOG2 - log2)
}
