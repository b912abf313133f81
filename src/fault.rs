//! Invariant violations.
//!
//! Every malformed request (unknown pointer, interior pointer, double free) is
//! a programmer error. The allocator never returns these to the caller: the
//! hot paths hand them to [`fatal`], which panics with the fault text. With
//! `panic = "abort"` (see `[profile.fast]`) that terminates the process.
//! [`SlabAllocator::verify`](crate::SlabAllocator::verify) is the one
//! non-fatal consumer.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("zero-sized request")]
    ZeroSize,

    #[error("request of {0} bytes has no power-of-two size class")]
    SizeOverflow(usize),

    #[error("size class log2={0} is not slab-backed")]
    ClassOutOfRange(u32),

    #[error("pointer {0:#x} is not owned by this allocator")]
    UnknownPointer(usize),

    #[error("pointer {addr:#x} is not a cell boundary (offset {offset} in a {cell}-byte class)")]
    MisalignedFree {
        addr: usize,
        offset: usize,
        cell: usize,
    },

    #[error("free of {0:#x} in a slab with no live cells")]
    FreeOfIdleCell(usize),

    #[error("double free: cell {index} at {addr:#x} appears {count} times in the free list")]
    DoubleFree {
        addr: usize,
        index: usize,
        count: usize,
    },

    #[error("cell {index} at {addr:#x} is already free")]
    StaleCell { addr: usize, index: usize },

    #[error("backing allocator returned live fallback pointer {0:#x} twice")]
    DuplicateFallback(usize),

    #[error("slab range at {base:#x} overlaps its neighbour at {neighbour:#x}")]
    RangeOverlap { base: usize, neighbour: usize },

    #[error("bookkeeping corrupted: {0}")]
    Corrupted(String),
}

/// Abort the current operation on a violated invariant.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(fault: Fault) -> ! {
    panic!("slabby: {fault}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_pointer() {
        let msg = Fault::UnknownPointer(0x1000).to_string();
        assert_eq!(msg, "pointer 0x1000 is not owned by this allocator");
    }

    #[test]
    #[should_panic(expected = "slabby: double free")]
    fn test_fatal_panics_with_prefix() {
        fatal(Fault::DoubleFree {
            addr: 0x40,
            index: 4,
            count: 2,
        });
    }
}
