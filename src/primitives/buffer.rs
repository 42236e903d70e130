#![forbid(unsafe_code)]

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{BlockRef, Result};

/// Shared, lock-protected image of one block held by the buffer cache.
///
/// The lock is short-term: callers take it only while reading or writing
/// bytes and never across another buffer-cache call.
pub struct NodeHandle {
    bno: BlockRef,
    buf: Arc<RwLock<Box<[u8]>>>,
}

impl NodeHandle {
    /// Wraps a cached block image.
    pub fn new(bno: BlockRef, buf: Arc<RwLock<Box<[u8]>>>) -> Self {
        Self { bno, buf }
    }

    /// Block number this handle refers to.
    pub fn bno(&self) -> BlockRef {
        self.bno
    }

    /// Locks the block for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Locks the block for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.buf.write()
    }

    /// True when both handles share one cached image.
    pub fn same_buffer(&self, other: &NodeHandle) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }

    /// Second view of the same buffer that carries no hold of its own.
    ///
    /// Aliases must never be handed back to [`BufferCache::release`].
    pub(crate) fn alias(&self) -> NodeHandle {
        NodeHandle {
            bno: self.bno,
            buf: Arc::clone(&self.buf),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle").field("bno", &self.bno).finish()
    }
}

/// Transactional block cache consumed by the btree.
pub trait BufferCache {
    /// Block size in bytes.
    fn block_size(&self) -> usize;
    /// Acquires an existing block. Every successful call must be paired with
    /// a [`BufferCache::release`].
    fn read_block(&self, bno: BlockRef) -> Result<NodeHandle>;
    /// Acquires a freshly allocated block with zeroed contents.
    fn get_new_block(&self, bno: BlockRef) -> Result<NodeHandle>;
    /// Records that `range` of the block was modified in this transaction.
    fn log_mutation(&self, handle: &NodeHandle, range: Range<usize>);
    /// Gives a hold back to the cache.
    fn release(&self, handle: NodeHandle);
}

/// Scoped hold on a block; dropping it releases the block to its cache.
pub struct BlockGuard<'a, C: BufferCache + ?Sized> {
    cache: &'a C,
    handle: Option<NodeHandle>,
}

impl<'a, C: BufferCache + ?Sized> BlockGuard<'a, C> {
    /// Takes ownership of a hold returned by `cache`.
    pub fn new(cache: &'a C, handle: NodeHandle) -> Self {
        Self {
            cache,
            handle: Some(handle),
        }
    }

    /// Reads `bno` from `cache` and guards the resulting hold.
    pub fn acquire(cache: &'a C, bno: BlockRef) -> Result<Self> {
        let handle = cache.read_block(bno)?;
        Ok(Self::new(cache, handle))
    }

    /// Acquires a zeroed new block and guards it.
    pub fn acquire_new(cache: &'a C, bno: BlockRef) -> Result<Self> {
        let handle = cache.get_new_block(bno)?;
        Ok(Self::new(cache, handle))
    }
}

impl<C: BufferCache + ?Sized> Deref for BlockGuard<'_, C> {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("block guard emptied before drop"),
        }
    }
}

impl<C: BufferCache + ?Sized> Drop for BlockGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.release(handle);
        }
    }
}

impl<C: BufferCache + ?Sized> fmt::Debug for BlockGuard<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockGuard").field(&self.handle).finish()
    }
}
