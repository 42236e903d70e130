#![forbid(unsafe_code)]

use crate::types::{BlockRef, Result};

/// Block allocator consumed by split and new-root.
pub trait BlockAllocator {
    /// Allocates one block, preferring the free block closest to `near`.
    /// Returns [`crate::types::InobtError::NoSpace`] when nothing is free.
    fn allocate_block(&self, near: BlockRef) -> Result<BlockRef>;
    /// Returns a block emptied by a join or root collapse.
    fn free_block(&self, bno: BlockRef) -> Result<()>;
}

/// Run of contiguous free blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Extent {
    /// First free block.
    pub start: u32,
    /// Number of blocks in the run.
    pub len: u32,
}

impl Extent {
    /// Builds an extent.
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.len)
    }

    fn contains(&self, bno: u32) -> bool {
        bno >= self.start && u64::from(bno) < self.end()
    }

    fn coalesce_with(&mut self, other: &Extent) -> bool {
        if self.end() == u64::from(other.start) {
            self.len += other.len;
            true
        } else {
            false
        }
    }
}

/// Sorted, coalesced set of free extents with nearest-block allocation.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct FreeExtents {
    extents: Vec<Extent>,
}

impl FreeExtents {
    /// Builds the set from arbitrary extents, merging adjacent runs.
    pub fn from_extents(extents: Vec<Extent>) -> Self {
        let mut set = Self { extents };
        set.rebuild();
        set
    }

    /// Current extents in block order.
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Total number of free blocks.
    pub fn free_blocks(&self) -> u64 {
        self.extents.iter().map(|e| u64::from(e.len)).sum()
    }

    /// True when `bno` is free.
    pub fn is_free(&self, bno: u32) -> bool {
        let idx = self.extents.partition_point(|e| e.end() <= u64::from(bno));
        self.extents
            .get(idx)
            .map_or(false, |extent| extent.contains(bno))
    }

    /// Removes and returns the free block closest to `near`.
    ///
    /// Ties go to the lower block.
    pub fn take_near(&mut self, near: u32) -> Option<u32> {
        let idx = self.extents.partition_point(|e| e.end() <= u64::from(near));
        if let Some(extent) = self.extents.get(idx) {
            if extent.contains(near) {
                self.remove_block(idx, near);
                return Some(near);
            }
        }
        let below = idx
            .checked_sub(1)
            .map(|i| (i, self.extents[i].start + (self.extents[i].len - 1)));
        let above = self.extents.get(idx).map(|extent| (idx, extent.start));
        let (pos, bno) = match (below, above) {
            (Some(b), Some(a)) => {
                if near - b.1 <= a.1 - near {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        self.remove_block(pos, bno);
        Some(bno)
    }

    /// Returns a block to the set. Freeing a block twice is rejected.
    pub fn insert(&mut self, bno: u32) -> bool {
        if self.is_free(bno) {
            return false;
        }
        self.extents.push(Extent::new(bno, 1));
        self.rebuild();
        true
    }

    fn remove_block(&mut self, pos: usize, bno: u32) {
        let extent = self.extents[pos];
        if extent.len == 1 {
            self.extents.remove(pos);
        } else if bno == extent.start {
            self.extents[pos].start += 1;
            self.extents[pos].len -= 1;
        } else if u64::from(bno) + 1 == extent.end() {
            self.extents[pos].len -= 1;
        } else {
            let head = bno - extent.start;
            self.extents[pos].len = head;
            let tail = Extent::new(bno + 1, extent.len - head - 1);
            self.extents.insert(pos + 1, tail);
        }
    }

    fn rebuild(&mut self) {
        self.extents.retain(|e| e.len > 0);
        self.extents.sort_by_key(|e| e.start);
        let mut merged: Vec<Extent> = Vec::with_capacity(self.extents.len());
        for extent in self.extents.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.coalesce_with(&extent) {
                    continue;
                }
            }
            merged.push(extent);
        }
        self.extents = merged;
    }
}
