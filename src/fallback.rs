//! Fallback store: allocations delegated to the backing allocator.
//!
//! Requests above the largest slab class, and requests whose class has hit
//! its slab quota, are served by the backing allocator directly. Each one is
//! recorded as `(pointer, log2)` in a table sorted by address so that `free`
//! and `realloc` can recognise it and rebuild its layout.

use crate::fault::{Fault, fatal};
use crate::size_class;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use std::alloc::handle_alloc_error;
use tracing::trace;

/// Fallback blocks are aligned to their own size, capped at one page.
pub const FALLBACK_MAX_ALIGN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackEntry {
    pub ptr: NonNull<u8>,
    pub log2: u32,
}

impl FallbackEntry {
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn size(&self) -> usize {
        size_class::class_to_size(self.log2)
    }
}

/// Layout of a fallback block of class `log2`.
pub fn layout_for(log2: u32) -> Layout {
    let size = 1usize
        .checked_shl(log2)
        .unwrap_or_else(|| fatal(Fault::ClassOutOfRange(log2)));
    match Layout::from_size_align(size, size.min(FALLBACK_MAX_ALIGN)) {
        Ok(layout) => layout,
        Err(_) => fatal(Fault::SizeOverflow(size)),
    }
}

#[derive(Debug, Default)]
pub struct FallbackStore {
    entries: Vec<FallbackEntry>,
}

impl FallbackStore {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FallbackEntry> {
        self.entries.iter()
    }

    /// Total bytes held by live fallback blocks.
    pub fn bytes(&self) -> usize {
        self.entries.iter().map(FallbackEntry::size).sum()
    }

    #[inline]
    fn search(&self, addr: usize) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&addr, FallbackEntry::addr)
    }

    pub fn find(&self, addr: usize) -> Option<FallbackEntry> {
        self.search(addr).ok().map(|i| self.entries[i])
    }

    /// Allocate `2^log2` bytes from the backing allocator and record them.
    pub fn alloc<A: GlobalAlloc>(&mut self, backing: &A, log2: u32) -> NonNull<u8> {
        let layout = layout_for(log2);
        // SAFETY: fallback layouts are at least one cell long.
        let raw = unsafe { backing.alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        let entry = FallbackEntry { ptr, log2 };
        match self.search(entry.addr()) {
            Ok(_) => fatal(Fault::DuplicateFallback(entry.addr())),
            Err(pos) => self.entries.insert(pos, entry),
        }
        trace!(size = layout.size(), ptr = ?ptr, live = self.entries.len(), "fallback alloc");
        ptr
    }

    /// Forget a fallback block and hand it back to the backing allocator.
    ///
    /// A pointer that was never recorded is fatal.
    ///
    /// # Safety
    ///
    /// `backing` must be the allocator that served `ptr`, and `ptr` must not
    /// be used afterwards.
    pub unsafe fn free<A: GlobalAlloc>(&mut self, backing: &A, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let Ok(pos) = self.search(addr) else {
            fatal(Fault::UnknownPointer(addr));
        };
        let entry = self.entries.remove(pos);
        trace!(size = entry.size(), ptr = ?ptr, live = self.entries.len(), "fallback free");
        unsafe { backing.dealloc(entry.ptr.as_ptr(), layout_for(entry.log2)) };
    }

    /// Release every live block, at teardown.
    ///
    /// # Safety
    ///
    /// Same contract as [`FallbackStore::free`], for every live block.
    pub(crate) unsafe fn release_all<A: GlobalAlloc>(&mut self, backing: &A) {
        for entry in self.entries.drain(..) {
            unsafe { backing.dealloc(entry.ptr.as_ptr(), layout_for(entry.log2)) };
        }
    }

    pub(crate) fn check(&self) -> Result<(), Fault> {
        match self.entries.windows(2).find(|w| w[0].addr() >= w[1].addr()) {
            Some(w) => Err(Fault::Corrupted(format!(
                "fallback table out of order at {:#x}",
                w[1].addr()
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::System;

    #[test]
    fn test_layout_alignment_is_capped() {
        assert_eq!(layout_for(4).align(), 16);
        assert_eq!(layout_for(12).align(), 4096);
        assert_eq!(layout_for(17).align(), 4096);
        assert_eq!(layout_for(17).size(), 1 << 17);
    }

    #[test]
    fn test_alloc_keeps_table_sorted() {
        let mut store = FallbackStore::default();
        let ptrs: Vec<_> = (0..16).map(|_| store.alloc(&System, 17)).collect();
        assert_eq!(store.len(), 16);
        assert_eq!(store.bytes(), 16 << 17);
        store.check().unwrap();

        for p in &ptrs {
            assert_eq!(store.find(p.as_ptr() as usize).unwrap().log2, 17);
        }
        for p in ptrs.into_iter().rev().step_by(2) {
            unsafe { store.free(&System, p) };
        }
        assert_eq!(store.len(), 8);
        store.check().unwrap();

        unsafe { store.release_all(&System) };
        assert!(store.is_empty());
    }

    #[test]
    fn test_find_requires_exact_pointer() {
        let mut store = FallbackStore::default();
        let p = store.alloc(&System, 10);
        assert!(store.find(p.as_ptr() as usize + 8).is_none());
        unsafe { store.free(&System, p) };
        assert!(store.find(p.as_ptr() as usize).is_none());
    }

    #[test]
    #[should_panic(expected = "not owned by this allocator")]
    fn test_free_of_unknown_pointer_is_fatal() {
        let mut store = FallbackStore::default();
        let mut local = 0u64;
        unsafe { store.free(&System, NonNull::from(&mut local).cast()) };
    }
}
