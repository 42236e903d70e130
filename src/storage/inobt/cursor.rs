use smallvec::SmallVec;

use super::block::{
    check_block, BlockExpectation, BlockHeader, InobtGeometry, NodeMut, NodeRef, BB_NUMRECS,
};
use super::record::InobtRec;
use super::tree::InodeBtree;
use crate::primitives::{AgTransaction, BlockGuard, NodeHandle};
use crate::types::{BlockRef, InobtError, Result};

/// Levels kept inline before the path spills to the heap.
const INLINE_LEVELS: usize = 8;

/// Hold on a block taken through the cursor's transaction.
pub(crate) type Held<'a> = BlockGuard<'a, dyn AgTransaction + 'a>;

/// How a lookup treats a key that is not present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupMode {
    /// Exact match only; the slot is left at the insertion point.
    Eq,
    /// Smallest record with key `>=` the search key.
    Ge,
    /// Largest record with key `<=` the search key.
    Le,
}

pub(crate) struct CursorLevel<'a> {
    pub(crate) block: Option<Held<'a>>,
    pub(crate) slot: usize,
}

/// Position in an inode btree: the block and 1-based slot visited at every
/// level from the leaf (level 0) up to the root.
///
/// Slot 0 means "before the first entry"; a slot past the block's record
/// count means "after the last". Every block the cursor holds is released
/// when it is dropped or moved elsewhere.
pub struct Cursor<'a> {
    pub(crate) tree: &'a InodeBtree,
    pub(crate) tx: &'a dyn AgTransaction,
    pub(crate) levels: SmallVec<[CursorLevel<'a>; INLINE_LEVELS]>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(tree: &'a InodeBtree, tx: &'a dyn AgTransaction) -> Self {
        Self {
            tree,
            tx,
            levels: SmallVec::new(),
        }
    }

    /// Number of levels on the cursor's path.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Slot held at `level`, 0 if the level is not on the path.
    pub fn slot(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.slot)
    }

    /// Block held at `level`.
    pub fn block(&self, level: usize) -> Option<BlockRef> {
        self.levels
            .get(level)
            .and_then(|l| l.block.as_ref())
            .map(|guard| guard.bno())
    }

    /// Copy of this cursor holding its own references to the same blocks.
    pub fn dup(&self) -> Result<Cursor<'a>> {
        let mut levels = SmallVec::with_capacity(self.levels.len());
        for level in &self.levels {
            let block = match &level.block {
                Some(guard) => Some(BlockGuard::acquire(self.tx, guard.bno())?),
                None => None,
            };
            levels.push(CursorLevel {
                block,
                slot: level.slot,
            });
        }
        Ok(Cursor {
            tree: self.tree,
            tx: self.tx,
            levels,
        })
    }

    /// Record under the leaf slot, `None` when the slot is off either end.
    pub fn get_record(&self) -> Result<Option<InobtRec>> {
        let slot = self.slot(0);
        let buf = self.buf(0)?;
        let data = buf.read();
        let node = NodeRef::new(&data, self.geo());
        if slot == 0 || slot > node.numrecs() {
            return Ok(None);
        }
        Ok(Some(node.rec(slot)))
    }

    /// Rewrites the free count and mask of the record under the cursor.
    ///
    /// The key must match the record in place.
    pub fn update(&mut self, rec: &InobtRec) -> Result<()> {
        let slot = self.slot(0);
        let geo = *self.geo();
        let buf = self.buf(0)?;
        {
            let mut data = buf.write();
            let mut node = NodeMut::new(&mut data, &geo);
            if slot == 0 || slot > node.view().numrecs() {
                return Err(InobtError::Logic("update on a cursor not positioned on a record"));
            }
            if node.view().rec(slot).start_ino != rec.start_ino {
                return Err(InobtError::Logic("update cannot change a record's key"));
            }
            node.set_rec(slot, rec);
        }
        self.log_entries(&buf, 0, slot, slot);
        if slot == 1 {
            self.update_key(rec.start_ino, 1)?;
        }
        self.tree.stats().inc_updates();
        Ok(())
    }

    pub(crate) fn geo(&self) -> &'a InobtGeometry {
        self.tree.geometry()
    }

    /// Unaccounted view of the block at `level`.
    pub(crate) fn buf(&self, level: usize) -> Result<NodeHandle> {
        self.levels
            .get(level)
            .and_then(|l| l.block.as_ref())
            .map(|guard| guard.alias())
            .ok_or(InobtError::Logic("cursor not positioned at this level"))
    }

    pub(crate) fn header(&self, level: usize) -> Result<BlockHeader> {
        let buf = self.buf(level)?;
        let data = buf.read();
        BlockHeader::parse(&data)
    }

    pub(crate) fn numrecs(&self, level: usize) -> Result<usize> {
        Ok(usize::from(self.header(level)?.numrecs))
    }

    /// Child pointer under the slot of interior `level`.
    pub(crate) fn child_ptr(&self, level: usize) -> Result<BlockRef> {
        let slot = self.slot(level);
        let buf = self.buf(level)?;
        let data = buf.read();
        let node = NodeRef::new(&data, self.geo());
        if slot == 0 || slot > node.numrecs() {
            return Err(InobtError::Corruption("interior slot outside its block"));
        }
        Ok(node.ptr(slot))
    }

    pub(crate) fn set_slot(&mut self, level: usize, slot: usize) {
        if let Some(l) = self.levels.get_mut(level) {
            l.slot = slot;
        }
    }

    /// Points `level` at a new block, releasing the one held before.
    pub(crate) fn set_block(&mut self, level: usize, guard: Held<'a>) {
        if let Some(l) = self.levels.get_mut(level) {
            l.block = Some(guard);
        }
    }

    fn expectation(&self, bno: BlockRef, level: usize) -> BlockExpectation {
        BlockExpectation {
            kind: self.tree.kind(),
            bno,
            level: level as u16,
            ag_blocks: self.tx.ag_blocks(),
        }
    }

    /// Reads `bno` expecting it at `level`, checking its header.
    pub(crate) fn read_node(&self, bno: BlockRef, level: usize) -> Result<Held<'a>> {
        let guard = BlockGuard::acquire(self.tx, bno)?;
        {
            let data = guard.read();
            check_block(&data, self.geo(), &self.expectation(bno, level))?;
        }
        Ok(guard)
    }

    /// Acquires a freshly allocated block.
    pub(crate) fn new_node(&self, bno: BlockRef) -> Result<Held<'a>> {
        BlockGuard::acquire_new(self.tx, bno)
    }

    /// Makes `level` hold `bno`, re-reading only when the cursor holds
    /// something else there. The header is checked either way.
    pub(crate) fn load_level(&mut self, level: usize, bno: BlockRef) -> Result<()> {
        if self.block(level) == Some(bno) {
            let buf = self.buf(level)?;
            let data = buf.read();
            check_block(&data, self.geo(), &self.expectation(bno, level))?;
            return Ok(());
        }
        let guard = self.read_node(bno, level)?;
        self.set_block(level, guard);
        Ok(())
    }

    /// Resizes the path to the tree's current height.
    pub(crate) fn reset_height(&mut self, height: u16) -> Result<()> {
        if height == 0 {
            return Err(InobtError::Corruption("inode btree has no root"));
        }
        if height > self.geo().max_levels {
            return Err(InobtError::Corruption("inode btree taller than its maximum height"));
        }
        let height = usize::from(height);
        self.levels.truncate(height);
        while self.levels.len() < height {
            self.levels.push(CursorLevel {
                block: None,
                slot: 0,
            });
        }
        Ok(())
    }

    pub(crate) fn log_entries(&self, handle: &NodeHandle, level: usize, first: usize, last: usize) {
        for range in self.geo().entry_ranges(level, first, last) {
            self.tx.log_mutation(handle, range);
        }
    }

    pub(crate) fn log_header(&self, handle: &NodeHandle, fields: u8) {
        self.tx.log_mutation(handle, self.geo().header_range(fields));
    }

    pub(crate) fn log_numrecs(&self, handle: &NodeHandle) {
        self.log_header(handle, BB_NUMRECS);
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<(Option<BlockRef>, usize)> = (0..self.levels.len())
            .map(|level| (self.block(level), self.slot(level)))
            .collect();
        f.debug_struct("Cursor")
            .field("agno", &self.tree.agno())
            .field("path", &path)
            .finish()
    }
}
