//! Multi-threaded integration test.
//!
//! The allocator has no internal locking. These tests cover the two supported
//! arrangements: one allocator per thread, and one allocator behind a lock.

use slabby::SlabAllocator;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

#[test]
fn test_allocator_per_thread() {
    let num_threads = 8;
    let iterations = 1000;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            std::thread::spawn(move || {
                let mut slabs = SlabAllocator::new();
                let mut live = Vec::new();
                for i in 0..iterations {
                    let p = slabs.alloc(8 + (t * iterations + i) % 2000);
                    live.push(p);
                    if live.len() > 10 {
                        unsafe { slabs.free(live.remove(0)) };
                    }
                }
                slabs.verify().unwrap();
                live.len()
            })
        })
        .collect();

    for h in handles {
        let result = h.join().unwrap();
        assert!(result > 0);
    }
}

#[test]
fn test_move_allocator_between_threads() {
    let mut slabs = SlabAllocator::new();
    let addr = slabs.alloc(64).as_ptr() as usize;

    let slabs = std::thread::spawn(move || {
        let p = NonNull::new(addr as *mut u8).unwrap();
        assert!(slabs.is_slab_owned(p));
        unsafe { slabs.free(p) };
        slabs
    })
    .join()
    .unwrap();

    assert_eq!(slabs.stats().live_slab_bytes, 0);
}

#[test]
fn test_shared_behind_lock() {
    let num_threads = 4;
    let items_per_thread = 500;
    let slabs = Arc::new(Mutex::new(SlabAllocator::new()));

    // Producers allocate, the main thread frees: pointers travel as addresses.
    let producers: Vec<_> = (0..num_threads)
        .map(|t| {
            let slabs = Arc::clone(&slabs);
            std::thread::spawn(move || {
                (0..items_per_thread)
                    .map(|i| {
                        let size = match (t + i) % 4 {
                            0 => 8,
                            1 => 64,
                            2 => 4096,
                            _ => 40_000,
                        };
                        let p = slabs.lock().unwrap().alloc(size);
                        unsafe { p.as_ptr().write(i as u8) };
                        (p.as_ptr() as usize, i as u8)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut total = 0;
    for h in producers {
        for (addr, tag) in h.join().unwrap() {
            let p = NonNull::new(addr as *mut u8).unwrap();
            assert_eq!(unsafe { p.as_ptr().read() }, tag);
            unsafe { slabs.lock().unwrap().free(p) };
            total += 1;
        }
    }
    assert_eq!(total, num_threads * items_per_thread);

    let slabs = slabs.lock().unwrap();
    assert_eq!(slabs.fallback_len(), 0);
    assert_eq!(slabs.stats().live_slab_bytes, 0);
    slabs.verify().unwrap();
}
