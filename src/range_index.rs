//! Address range index: slab base address -> (size class, slab).
//!
//! One entry per slab across all classes, kept sorted by base address. A
//! pointer is classified by binary search in O(log S). A miss means the
//! pointer belongs to the fallback store (or to nobody).

use crate::fault::{Fault, fatal};
use crate::size_class::{self, SLAB_SPAN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub base: usize,
    pub class_index: usize,
    pub slab_index: usize,
}

impl RangeEntry {
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr.wrapping_sub(self.base) < SLAB_SPAN
    }

    #[inline]
    pub fn log2(&self) -> u32 {
        size_class::class_log2(self.class_index)
    }
}

#[derive(Debug, Default)]
pub struct RangeIndex {
    entries: Vec<RangeEntry>,
}

impl RangeIndex {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RangeEntry> {
        self.entries.iter()
    }

    /// Index of the first entry whose base is `>= addr`.
    #[inline]
    fn lower_bound(&self, addr: usize) -> usize {
        self.entries.partition_point(|e| e.base < addr)
    }

    /// Insert a new slab range, shifting later entries right.
    ///
    /// Overlap with a neighbour is fatal: the backing allocator never hands
    /// out the same span twice while both are live.
    pub fn insert(&mut self, entry: RangeEntry) {
        let pos = self.lower_bound(entry.base);
        if let Some(next) = self.entries.get(pos) {
            if next.base - entry.base < SLAB_SPAN {
                fatal(Fault::RangeOverlap {
                    base: entry.base,
                    neighbour: next.base,
                });
            }
        }
        if let Some(prev) = pos.checked_sub(1).map(|i| &self.entries[i]) {
            if prev.contains(entry.base) {
                fatal(Fault::RangeOverlap {
                    base: entry.base,
                    neighbour: prev.base,
                });
            }
        }
        self.entries.insert(pos, entry);
    }

    /// Find the slab that owns `addr`.
    ///
    /// The lower bound lands on the owner only when `addr` is exactly a slab
    /// base. Otherwise the owner, if any, is the entry just before it.
    pub fn find_owner(&self, addr: usize) -> Option<RangeEntry> {
        let found = self.lower_bound(addr);
        [Some(found), found.checked_sub(1)]
            .into_iter()
            .flatten()
            .filter_map(|i| self.entries.get(i))
            .find(|e| e.contains(addr))
            .copied()
    }

    pub(crate) fn check(&self) -> Result<(), Fault> {
        for pair in self.entries.windows(2) {
            if pair[1].base < pair[0].base || pair[1].base - pair[0].base < SLAB_SPAN {
                return Err(Fault::RangeOverlap {
                    base: pair[1].base,
                    neighbour: pair[0].base,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: usize, slab_index: usize) -> RangeEntry {
        RangeEntry {
            base,
            class_index: 0,
            slab_index,
        }
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut index = RangeIndex::default();
        for (i, base) in [5, 1, 9, 3, 7].into_iter().enumerate() {
            index.insert(entry(base * SLAB_SPAN, i));
        }
        let bases: Vec<_> = index.iter().map(|e| e.base / SLAB_SPAN).collect();
        assert_eq!(bases, vec![1, 3, 5, 7, 9]);
        index.check().unwrap();
    }

    #[test]
    fn test_find_owner_exact_base() {
        let mut index = RangeIndex::default();
        index.insert(entry(2 * SLAB_SPAN, 0));
        index.insert(entry(4 * SLAB_SPAN, 1));
        assert_eq!(index.find_owner(4 * SLAB_SPAN).unwrap().slab_index, 1);
        assert_eq!(index.find_owner(2 * SLAB_SPAN).unwrap().slab_index, 0);
    }

    #[test]
    fn test_find_owner_interior_and_last_byte() {
        let mut index = RangeIndex::default();
        index.insert(entry(2 * SLAB_SPAN, 0));
        index.insert(entry(4 * SLAB_SPAN, 1));
        assert_eq!(index.find_owner(2 * SLAB_SPAN + 48).unwrap().slab_index, 0);
        assert_eq!(index.find_owner(5 * SLAB_SPAN - 1).unwrap().slab_index, 1);
    }

    #[test]
    fn test_find_owner_misses() {
        let mut index = RangeIndex::default();
        assert!(index.find_owner(0x1000).is_none());

        index.insert(entry(2 * SLAB_SPAN, 0));
        index.insert(entry(4 * SLAB_SPAN, 1));
        // Before the first, in the gap, one past the end.
        assert!(index.find_owner(SLAB_SPAN).is_none());
        assert!(index.find_owner(3 * SLAB_SPAN).is_none());
        assert!(index.find_owner(5 * SLAB_SPAN).is_none());
    }

    #[test]
    fn test_adjacent_ranges_are_not_overlapping() {
        let mut index = RangeIndex::default();
        index.insert(entry(SLAB_SPAN, 0));
        index.insert(entry(2 * SLAB_SPAN, 1));
        assert_eq!(index.find_owner(2 * SLAB_SPAN - 1).unwrap().slab_index, 0);
        assert_eq!(index.find_owner(2 * SLAB_SPAN).unwrap().slab_index, 1);
    }

    #[test]
    #[should_panic(expected = "overlaps its neighbour")]
    fn test_overlap_is_fatal() {
        let mut index = RangeIndex::default();
        index.insert(entry(2 * SLAB_SPAN, 0));
        index.insert(entry(2 * SLAB_SPAN + SLAB_SPAN / 2, 1));
    }
}
