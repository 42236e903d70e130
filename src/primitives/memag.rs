#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use super::agi::AgHeader;
use super::alloc::{BlockAllocator, Extent, FreeExtents};
use super::buffer::{BufferCache, NodeHandle};
use crate::types::{AgNumber, BlockRef, InobtError, Result};

const MIN_BLOCK_SIZE: usize = 64;

/// Counters kept by [`MemAllocGroup`].
#[derive(Default, Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MemAllocGroupStats {
    /// Blocks acquired through `read_block`.
    pub reads: u64,
    /// Blocks acquired through `get_new_block`.
    pub new_blocks: u64,
    /// Byte ranges logged.
    pub logged_ranges: u64,
    /// Successful allocations.
    pub allocations: u64,
    /// Blocks returned to free space.
    pub frees: u64,
    /// Committed transactions.
    pub commits: u64,
    /// Aborted transactions.
    pub aborts: u64,
}

struct Frame {
    buf: Arc<RwLock<Box<[u8]>>>,
    holds: usize,
}

struct MemAgInner {
    committed: HashMap<BlockRef, Box<[u8]>>,
    frames: HashMap<BlockRef, Frame>,
    logged: HashMap<BlockRef, Vec<Range<usize>>>,
    free: FreeExtents,
    free_snapshot: FreeExtents,
    root: (BlockRef, u16),
    root_snapshot: (BlockRef, u16),
    alloc_limit: Option<u64>,
    stats: MemAllocGroupStats,
}

/// In-memory allocation group providing the buffer cache, block allocator and
/// header the inode btree runs against.
///
/// The group always has one open transaction. [`MemAllocGroup::commit`]
/// persists logged ranges and fails if any byte changed without being logged;
/// [`MemAllocGroup::abort`] puts blocks, free space and the root back to the
/// last commit.
pub struct MemAllocGroup {
    agno: AgNumber,
    block_size: usize,
    ag_blocks: u32,
    inner: Mutex<MemAgInner>,
}

impl MemAllocGroup {
    /// Creates a group of `ag_blocks` blocks; the first `reserved` blocks are
    /// never handed out by the allocator.
    pub fn new(agno: AgNumber, block_size: usize, ag_blocks: u32, reserved: u32) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(InobtError::Invalid("block size below 64 bytes"));
        }
        if ag_blocks == u32::MAX {
            return Err(InobtError::Invalid("allocation group too large"));
        }
        if reserved >= ag_blocks {
            return Err(InobtError::Invalid("reserved blocks exceed the allocation group"));
        }
        let free = FreeExtents::from_extents(vec![Extent::new(reserved, ag_blocks - reserved)]);
        Ok(Self {
            agno,
            block_size,
            ag_blocks,
            inner: Mutex::new(MemAgInner {
                committed: HashMap::new(),
                frames: HashMap::new(),
                logged: HashMap::new(),
                free_snapshot: free.clone(),
                free,
                root: (BlockRef::NULL, 0),
                root_snapshot: (BlockRef::NULL, 0),
                alloc_limit: None,
                stats: MemAllocGroupStats::default(),
            }),
        })
    }

    /// Number of holds handed out and not yet released.
    pub fn outstanding_holds(&self) -> usize {
        self.inner.lock().frames.values().map(|f| f.holds).sum()
    }

    /// Number of free blocks in the current transaction.
    pub fn free_blocks(&self) -> u64 {
        self.inner.lock().free.free_blocks()
    }

    /// True when `bno` is currently free.
    pub fn is_block_free(&self, bno: BlockRef) -> bool {
        self.inner.lock().free.is_free(bno.0)
    }

    /// Caps how many further allocations succeed; `None` removes the cap.
    pub fn set_alloc_limit(&self, limit: Option<u64>) {
        self.inner.lock().alloc_limit = limit;
    }

    /// Copy of the current counters.
    pub fn stats(&self) -> MemAllocGroupStats {
        self.inner.lock().stats.clone()
    }

    /// Current contents of a block as seen by the open transaction.
    pub fn block_image(&self, bno: BlockRef) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&bno) {
            return Some(frame.buf.read().to_vec());
        }
        inner.committed.get(&bno).map(|img| img.to_vec())
    }

    /// Persists every logged range and starts a new transaction.
    pub fn commit(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for (bno, frame) in &inner.frames {
            let live = frame.buf.read();
            let ranges = inner.logged.get(bno).map(Vec::as_slice).unwrap_or(&[]);
            let changed = match inner.committed.get(bno) {
                Some(image) => first_unlogged_change(image, &live, ranges),
                None => first_unlogged_change(&vec![0u8; live.len()], &live, ranges),
            };
            if let Some(offset) = changed {
                warn!(
                    target: "inobt::memag",
                    agno = self.agno.0,
                    bno = bno.0,
                    offset,
                    "block modified outside logged ranges"
                );
                return Err(InobtError::Logic("block modified outside logged ranges"));
            }
        }
        let logged = std::mem::take(&mut inner.logged);
        for bno in logged.keys() {
            if let Some(frame) = inner.frames.get(bno) {
                let image = frame.buf.read().clone();
                inner.committed.insert(*bno, image);
            }
        }
        inner.free_snapshot = inner.free.clone();
        inner.root_snapshot = inner.root;
        inner.stats.commits += 1;
        debug!(
            target: "inobt::memag",
            agno = self.agno.0,
            blocks = logged.len(),
            root = inner.root.0 .0,
            height = inner.root.1,
            "transaction committed"
        );
        Ok(())
    }

    /// Discards everything since the last commit.
    pub fn abort(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for (bno, frame) in &inner.frames {
            let mut live = frame.buf.write();
            match inner.committed.get(bno) {
                Some(image) => live.copy_from_slice(image),
                None => live.fill(0),
            }
        }
        let dropped = inner.logged.len();
        inner.logged.clear();
        inner.free = inner.free_snapshot.clone();
        inner.root = inner.root_snapshot;
        inner.stats.aborts += 1;
        debug!(
            target: "inobt::memag",
            agno = self.agno.0,
            blocks = dropped,
            "transaction aborted"
        );
    }

    fn check_bounds(&self, bno: BlockRef) -> Result<()> {
        if bno.is_null() || bno.0 >= self.ag_blocks {
            return Err(InobtError::Corruption("block reference outside allocation group"));
        }
        Ok(())
    }
}

fn first_unlogged_change(before: &[u8], after: &[u8], ranges: &[Range<usize>]) -> Option<usize> {
    before
        .iter()
        .zip(after.iter())
        .enumerate()
        .find(|(offset, (a, b))| a != b && !ranges.iter().any(|r| r.contains(offset)))
        .map(|(offset, _)| offset)
}

impl BufferCache for MemAllocGroup {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, bno: BlockRef) -> Result<NodeHandle> {
        self.check_bounds(bno)?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let block_size = self.block_size;
        let committed = &inner.committed;
        let frame = inner.frames.entry(bno).or_insert_with(|| {
            let image = committed
                .get(&bno)
                .cloned()
                .unwrap_or_else(|| vec![0u8; block_size].into_boxed_slice());
            Frame {
                buf: Arc::new(RwLock::new(image)),
                holds: 0,
            }
        });
        frame.holds += 1;
        let handle = NodeHandle::new(bno, Arc::clone(&frame.buf));
        inner.stats.reads += 1;
        Ok(handle)
    }

    fn get_new_block(&self, bno: BlockRef) -> Result<NodeHandle> {
        self.check_bounds(bno)?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let block_size = self.block_size;
        let frame = inner.frames.entry(bno).or_insert_with(|| Frame {
            buf: Arc::new(RwLock::new(vec![0u8; block_size].into_boxed_slice())),
            holds: 0,
        });
        frame.buf.write().fill(0);
        frame.holds += 1;
        let handle = NodeHandle::new(bno, Arc::clone(&frame.buf));
        // A new block is written out whole.
        inner.logged.entry(bno).or_default().push(0..block_size);
        inner.stats.new_blocks += 1;
        Ok(handle)
    }

    fn log_mutation(&self, handle: &NodeHandle, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        if range.end > self.block_size {
            warn!(
                target: "inobt::memag",
                bno = handle.bno().0,
                start = range.start,
                end = range.end,
                "logged range past end of block"
            );
            return;
        }
        let mut inner = self.inner.lock();
        inner.logged.entry(handle.bno()).or_default().push(range);
        inner.stats.logged_ranges += 1;
    }

    fn release(&self, handle: NodeHandle) {
        let mut inner = self.inner.lock();
        match inner.frames.get_mut(&handle.bno()) {
            Some(frame) if frame.holds > 0 => frame.holds -= 1,
            _ => warn!(
                target: "inobt::memag",
                bno = handle.bno().0,
                "release without a matching hold"
            ),
        }
    }
}

impl BlockAllocator for MemAllocGroup {
    fn allocate_block(&self, near: BlockRef) -> Result<BlockRef> {
        let mut inner = self.inner.lock();
        if inner.alloc_limit == Some(0) {
            return Err(InobtError::NoSpace);
        }
        let target = if near.is_null() { 0 } else { near.0 };
        let bno = inner.free.take_near(target).ok_or(InobtError::NoSpace)?;
        if let Some(limit) = inner.alloc_limit.as_mut() {
            *limit -= 1;
        }
        inner.stats.allocations += 1;
        Ok(BlockRef(bno))
    }

    fn free_block(&self, bno: BlockRef) -> Result<()> {
        self.check_bounds(bno)?;
        let mut inner = self.inner.lock();
        if !inner.free.insert(bno.0) {
            return Err(InobtError::Corruption("block freed twice"));
        }
        inner.stats.frees += 1;
        Ok(())
    }
}

impl AgHeader for MemAllocGroup {
    fn agno(&self) -> AgNumber {
        self.agno
    }

    fn ag_blocks(&self) -> u32 {
        self.ag_blocks
    }

    fn root(&self) -> Result<(BlockRef, u16)> {
        Ok(self.inner.lock().root)
    }

    fn set_root(&self, root: BlockRef, height: u16) -> Result<()> {
        if height > 0 {
            self.check_bounds(root)?;
        }
        self.inner.lock().root = (root, height);
        Ok(())
    }
}
