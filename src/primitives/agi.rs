#![forbid(unsafe_code)]

use super::alloc::BlockAllocator;
use super::buffer::BufferCache;
use crate::types::{AgNumber, BlockRef, Result};

/// The allocation-group inode header: where the inode btree root lives.
pub trait AgHeader {
    /// Allocation group this header belongs to.
    fn agno(&self) -> AgNumber;
    /// Number of blocks in the allocation group. Sibling and child pointers
    /// must fall below it.
    fn ag_blocks(&self) -> u32;
    /// Current `(root block, height)`; height 0 means no tree was created.
    fn root(&self) -> Result<(BlockRef, u16)>;
    /// Records a new root and height. Logged like any other mutation.
    fn set_root(&self, root: BlockRef, height: u16) -> Result<()>;
}

/// Everything one btree operation needs from the transaction it runs in.
pub trait AgTransaction: BufferCache + BlockAllocator + AgHeader {}

impl<T: BufferCache + BlockAllocator + AgHeader + ?Sized> AgTransaction for T {}
