use tracing::debug;

use super::block::{
    BlockHeader, Entry, NodeMut, NodeRef, BB_ALL, BB_LEFTSIB, BB_NUMRECS, BB_RIGHTSIB,
};
use super::cursor::{Cursor, CursorLevel, LookupMode};
use super::record::InobtRec;
use crate::types::{AgIno, BlockRef, InobtError, Result};

/// Outcome of inserting at one level.
enum InsertStep<'a> {
    /// The cursor was not at a usable slot.
    Failed,
    /// Nothing left to do above this level.
    Done,
    /// The block split; `entry` must go into the parent, through `cursor`
    /// when the split produced one.
    Split {
        entry: Entry,
        cursor: Option<Cursor<'a>>,
    },
}

impl<'a> Cursor<'a> {
    /// Inserts `rec` at the cursor's leaf slot, normally the insertion point
    /// left by a missed [`LookupMode::Eq`] lookup.
    ///
    /// Returns false when the cursor is at slot 0. A key that does not fit
    /// between its neighbours at the slot is a logic error. Allocation
    /// failure surfaces as [`InobtError::NoSpace`]; blocks already changed
    /// at lower levels are left for the transaction to roll back.
    pub fn insert(&mut self, rec: &InobtRec) -> Result<bool> {
        let slot = self.slot(0);
        if slot == 0 {
            return Ok(false);
        }
        self.check_insert_position(slot, rec.start_ino)?;

        let mut entry = Entry::Rec(*rec);
        let mut level = 0;
        let mut spare: Option<Cursor<'a>> = None;
        let mut split = false;
        loop {
            let step = match spare.as_mut() {
                Some(cur) => cur.insert_at_level(level, entry)?,
                None => self.insert_at_level(level, entry)?,
            };
            match step {
                InsertStep::Failed if level == 0 => return Ok(false),
                InsertStep::Failed => {
                    return Err(InobtError::Corruption("split left no parent slot for the new block"))
                }
                InsertStep::Done => break,
                InsertStep::Split { entry: next, cursor } => {
                    split = true;
                    entry = next;
                    level += 1;
                    if let Some(cur) = cursor {
                        spare = Some(cur);
                    }
                }
            }
        }
        drop(spare);
        self.tree.stats().inc_inserts();

        // Splits can leave this cursor's upper levels behind the new layout.
        if split && !self.seek(rec.start_ino, LookupMode::Eq)? {
            return Err(InobtError::Corruption("inserted record missing after split"));
        }
        Ok(true)
    }

    fn check_insert_position(&self, slot: usize, key: AgIno) -> Result<()> {
        let buf = self.buf(0)?;
        let data = buf.read();
        let node = NodeRef::new(&data, self.geo());
        let numrecs = node.numrecs();
        if slot > numrecs + 1 {
            return Err(InobtError::Logic("insert slot past the end of the leaf"));
        }
        if slot > 1 && node.entry_key(slot - 1) >= key {
            return Err(InobtError::Logic("record key out of order at cursor position"));
        }
        if slot <= numrecs && node.entry_key(slot) <= key {
            return Err(InobtError::Logic("record key out of order at cursor position"));
        }
        Ok(())
    }

    fn insert_at_level(&mut self, level: usize, entry: Entry) -> Result<InsertStep<'a>> {
        if level >= self.height() {
            self.new_root()?;
            return Ok(InsertStep::Done);
        }
        let mut ptr = self.slot(level);
        if ptr == 0 {
            return Ok(InsertStep::Failed);
        }
        let mut optr = ptr;
        let geo = *self.geo();
        let mut pending = None;

        if self.numrecs(level)? == geo.maxrecs(level) {
            if self.rshift(level)? {
                // Slot unchanged; the last entry moved out.
            } else if self.lshift(level)? {
                ptr = self.slot(level);
                optr = ptr;
            } else {
                let (new_bno, split_key, cursor) = self.split(level)?;
                ptr = self.slot(level);
                pending = Some((
                    Entry::Child {
                        key: split_key,
                        ptr: new_bno,
                    },
                    cursor,
                ));
            }
        }

        let buf = self.buf(level)?;
        let numrecs = {
            let mut data = buf.write();
            let mut node = NodeMut::new(&mut data, &geo);
            let count = node.view().numrecs();
            if count >= geo.maxrecs(level) {
                return Err(InobtError::Corruption("no room in block after rebalancing"));
            }
            if ptr > count + 1 {
                return Err(InobtError::Corruption("insert slot beyond end of block"));
            }
            node.move_entries(ptr, ptr + 1, count + 1 - ptr);
            node.set_entry(ptr, &entry);
            node.set_numrecs(count + 1);
            count + 1
        };
        self.log_entries(&buf, level, ptr, numrecs);
        self.log_numrecs(&buf);

        if optr == 1 {
            self.update_key(entry.key(), level + 1)?;
        }
        Ok(match pending {
            None => InsertStep::Done,
            Some((entry, cursor)) => InsertStep::Split { entry, cursor },
        })
    }

    /// Splits the full block at `level`, moving its upper entries into a new
    /// right sibling. Returns the new block, its first key, and for non-root
    /// levels a cursor whose parent slot is one past the old block's entry.
    fn split(&mut self, level: usize) -> Result<(BlockRef, AgIno, Option<Cursor<'a>>)> {
        let geo = *self.geo();
        let lbuf = self.buf(level)?;
        let lbno = lbuf.bno();
        // Nothing is touched until the new block exists.
        let rbno = self.tx.allocate_block(lbno)?;
        let rguard = self.new_node(rbno)?;
        let slot = self.slot(level);

        let (lcount, rcount, split_key, old_right) = {
            let mut ldata = lbuf.write();
            let mut rdata = rguard.write();
            let mut left = NodeMut::new(&mut ldata, &geo);
            let mut right = NodeMut::new(&mut rdata, &geo);
            let lrecs = left.view().numrecs();
            let mut rrecs = lrecs / 2;
            if lrecs % 2 == 1 && slot <= rrecs + 1 {
                rrecs += 1;
            }
            let first = lrecs - rrecs + 1;
            let old_right = left.view().rightsib();
            right.init(&BlockHeader {
                magic: self.tree.kind().magic(),
                level: level as u16,
                numrecs: rrecs as u16,
                left: Some(lbno),
                right: old_right,
            });
            right.copy_entries_from(1, &left.view(), first, rrecs);
            let key = right.view().entry_key(1);
            left.set_numrecs(lrecs - rrecs);
            left.set_rightsib(Some(rbno));
            (lrecs - rrecs, rrecs, key, old_right)
        };
        self.log_header(&rguard, BB_ALL);
        self.log_entries(&rguard, level, 1, rcount);
        self.log_header(&lbuf, BB_NUMRECS | BB_RIGHTSIB);

        if let Some(rr) = old_right {
            let guard = self.read_node(rr, level)?;
            NodeMut::new(&mut guard.write(), &geo).set_leftsib(Some(rbno));
            self.log_header(&guard, BB_LEFTSIB);
        }

        if slot > lcount + 1 {
            self.set_block(level, rguard);
            self.set_slot(level, slot - lcount);
        } else {
            drop(rguard);
        }

        let cursor = if level + 1 < self.height() {
            let mut dup = self.dup()?;
            let parent = dup.slot(level + 1);
            dup.set_slot(level + 1, parent + 1);
            Some(dup)
        } else {
            None
        };

        self.tree.stats().inc_splits(level);
        debug!(
            target: "inobt::insert",
            agno = self.tree.agno().0,
            level,
            left = lbno.0,
            right = rbno.0,
            left_recs = lcount,
            right_recs = rcount,
            key = split_key.0,
            "split block"
        );
        Ok((rbno, split_key, cursor))
    }

    /// Adds a root above the current top level holding the top block and its
    /// sibling. The cursor's new top slot points at the block it came from.
    fn new_root(&mut self) -> Result<()> {
        let geo = *self.geo();
        let height = self.height();
        if height >= usize::from(geo.max_levels) {
            return Err(InobtError::Logic("inode btree height limit reached"));
        }
        let top = height - 1;
        let buf = self.buf(top)?;
        let header = self.header(top)?;
        let (lbno, rbno, nptr) = match (header.left, header.right) {
            (_, Some(right)) => (buf.bno(), right, 1),
            (Some(left), None) => (left, buf.bno(), 2),
            (None, None) => {
                return Err(InobtError::Corruption("new root over a block with no sibling"))
            }
        };
        let other = self.read_node(if nptr == 1 { rbno } else { lbno }, top)?;
        let (here_key, there_key) = {
            let here = buf.read();
            let there = other.read();
            (
                NodeRef::new(&here, &geo).first_key(),
                NodeRef::new(&there, &geo).first_key(),
            )
        };
        drop(other);
        let (lkey, rkey) = if nptr == 1 {
            (here_key, there_key)
        } else {
            (there_key, here_key)
        };
        let (Some(lkey), Some(rkey)) = (lkey, rkey) else {
            return Err(InobtError::Corruption("empty block below a new root"));
        };

        let (old_root, _) = self.tx.root()?;
        let nbno = self.tx.allocate_block(old_root)?;
        let guard = self.new_node(nbno)?;
        {
            let mut data = guard.write();
            let mut node = NodeMut::new(&mut data, &geo);
            node.init(&BlockHeader {
                magic: self.tree.kind().magic(),
                level: height as u16,
                numrecs: 2,
                left: None,
                right: None,
            });
            node.set_entry(1, &Entry::Child { key: lkey, ptr: lbno });
            node.set_entry(2, &Entry::Child { key: rkey, ptr: rbno });
        }
        self.log_header(&guard, BB_ALL);
        self.log_entries(&guard, height, 1, 2);
        self.tx.set_root(nbno, (height + 1) as u16)?;
        self.levels.push(CursorLevel {
            block: Some(guard),
            slot: nptr,
        });

        self.tree.stats().inc_new_roots();
        debug!(
            target: "inobt::insert",
            agno = self.tree.agno().0,
            root = nbno.0,
            height = height + 1,
            "grew new root"
        );
        Ok(())
    }
}
