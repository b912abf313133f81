//! Shared workloads for the allocator benchmarks.
//!
//! Each workload drives a `(alloc, free)` pair so the same access pattern can
//! be replayed against the slab allocator and against its backing allocators
//! used directly.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;

use slabby::SlabAllocator;

/// The minimal contract every benchmarked allocator satisfies.
pub trait BenchAlloc {
    fn alloc(&mut self, size: usize) -> NonNull<u8>;
    /// # Safety
    /// `ptr` and `size` must match a live allocation from `alloc`.
    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize);
}

impl<A: GlobalAlloc> BenchAlloc for SlabAllocator<A> {
    #[inline]
    fn alloc(&mut self, size: usize) -> NonNull<u8> {
        SlabAllocator::alloc(self, size)
    }

    #[inline]
    unsafe fn free(&mut self, ptr: NonNull<u8>, _size: usize) {
        unsafe { SlabAllocator::free(self, ptr) }
    }
}

/// A backing allocator used without the slab layer.
pub struct Direct<A>(pub A);

impl<A: GlobalAlloc> BenchAlloc for Direct<A> {
    #[inline]
    fn alloc(&mut self, size: usize) -> NonNull<u8> {
        let layout = Layout::from_size_align(size, 16).unwrap();
        NonNull::new(unsafe { self.0.alloc(layout) }).unwrap()
    }

    #[inline]
    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align(size, 16).unwrap();
        unsafe { self.0.dealloc(ptr.as_ptr(), layout) }
    }
}

/// Allocate then immediately free, `n` times: the LIFO fast path.
pub fn alloc_free_cycle<B: BenchAlloc>(a: &mut B, size: usize, n: usize) {
    for _ in 0..n {
        let p = a.alloc(size);
        unsafe { a.free(p, size) };
    }
}

/// Allocate `n` blocks of mixed sizes, then free them in allocation order.
pub fn batch_mixed<B: BenchAlloc>(a: &mut B, n: usize, live: &mut Vec<(NonNull<u8>, usize)>) {
    const SIZES: [usize; 6] = [16, 24, 64, 200, 1024, 4096];
    for i in 0..n {
        let size = SIZES[i % SIZES.len()];
        live.push((a.alloc(size), size));
    }
    for (p, size) in live.drain(..) {
        unsafe { a.free(p, size) };
    }
}
