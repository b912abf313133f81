//! slabby: a power-of-two slab allocator.
//!
//! Small requests are rounded up to a power of two and served from 1 MiB
//! slabs dedicated to that size. There is no per-allocation header; the owner
//! of a pointer is found from its address alone:
//! - Slab pools (one per class, 16 B to 32 KiB, LIFO free list per slab)
//! - Address range index (sorted slab bases, binary search)
//! - Fallback store (sorted table of blocks delegated to the backing allocator)
//!
//! Anything above 32 KiB, and anything whose class has used up its slab
//! quota, goes to the backing allocator.
//!
//! # Usage
//!
//! ```
//! use slabby::SlabAllocator;
//!
//! let mut slabs = SlabAllocator::new();
//! let p = slabs.alloc(24);
//! let p = unsafe { slabs.realloc(p, 4000) };
//! unsafe { slabs.free(p) };
//! ```
//!
//! The allocator is single-threaded. It is `Send` but not `Sync`; wrap it in
//! a lock to share it.

pub mod allocator;
pub mod fallback;
pub mod fault;
pub mod pool;
pub mod range_index;
pub mod size_class;
pub mod slab;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use allocator::{ClassStats, SlabAllocator, SlabConfig, SlabStats};
pub use fault::Fault;
pub use size_class::{
    MAX_SLABS_PER_CLASS, MAX_SLAB_CELL_LOG2, MIN_CELL_LOG2, SLAB_LIMIT_LOG2, SLAB_SPAN,
    SLAB_SPAN_LOG2,
};
