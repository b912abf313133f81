//! C-ABI exports for clients written in other languages.
//!
//! Gated behind `features = ["ffi"]`. Each allocator is an opaque handle
//! created with `slabby_create` and torn down with `slabby_destroy`. Handles
//! are not thread-safe: callers serialise access to each one.
//!
//! Faults panic, and a panic cannot unwind through `extern "C"`, so every
//! fault terminates the process.

use crate::allocator::SlabAllocator;
use core::ptr::NonNull;

pub type SlabbyHandle = SlabAllocator;

#[unsafe(no_mangle)]
pub extern "C" fn slabby_create() -> *mut SlabbyHandle {
    Box::into_raw(Box::new(SlabAllocator::new()))
}

/// # Safety
///
/// `handle` must come from `slabby_create` and is invalid afterwards, as is
/// every block it handed out. Null is ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn slabby_destroy(handle: *mut SlabbyHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

/// # Safety
///
/// `handle` must be a live handle from `slabby_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn slabby_alloc(handle: *mut SlabbyHandle, size: usize) -> *mut u8 {
    let slabs = unsafe { &mut *handle };
    slabs.alloc(size).as_ptr()
}

/// # Safety
///
/// `handle` must be a live handle from `slabby_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn slabby_calloc(handle: *mut SlabbyHandle, size: usize) -> *mut u8 {
    let slabs = unsafe { &mut *handle };
    slabs.calloc(size).as_ptr()
}

/// Like C `realloc`, a null `ptr` allocates.
///
/// # Safety
///
/// `handle` must be a live handle, and `ptr` null or a live block from it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn slabby_realloc(
    handle: *mut SlabbyHandle,
    ptr: *mut u8,
    new_size: usize,
) -> *mut u8 {
    let slabs = unsafe { &mut *handle };
    match NonNull::new(ptr) {
        Some(p) => unsafe { slabs.realloc(p, new_size) }.as_ptr(),
        None => slabs.alloc(new_size).as_ptr(),
    }
}

/// Like C `free`, a null `ptr` is ignored.
///
/// # Safety
///
/// `handle` must be a live handle, and `ptr` null or a live block from it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn slabby_free(handle: *mut SlabbyHandle, ptr: *mut u8) {
    let slabs = unsafe { &mut *handle };
    if let Some(p) = NonNull::new(ptr) {
        unsafe { slabs.free(p) };
    }
}
