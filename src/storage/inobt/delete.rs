use tracing::{debug, warn};

use super::block::{NodeMut, NodeRef, BB_LEFTSIB, BB_NUMRECS, BB_RIGHTSIB};
use super::cursor::{Cursor, Held};
use crate::types::{BlockRef, InobtError, Result};

/// Outcome of deleting at one level.
enum DeleteStep {
    /// The slot did not point at an entry.
    Failed,
    /// The tree is balanced again.
    Done,
    /// Two blocks were joined; the parent entry of the emptied block must go.
    Joined,
}

/// Which block survives a join.
enum JoinInto<'a> {
    /// The left sibling absorbs the cursor's block.
    Left(Held<'a>),
    /// The cursor's block absorbs its right sibling.
    Current(Held<'a>),
}

impl<'a> Cursor<'a> {
    /// Deletes the record under the cursor, rebalancing as needed.
    ///
    /// Returns false when the cursor is not on a record. Afterwards the
    /// cursor points at the entry that followed the deleted one.
    pub fn delete(&mut self) -> Result<bool> {
        let mut level = 0;
        loop {
            match self.delete_at_level(level)? {
                DeleteStep::Joined => level += 1,
                DeleteStep::Done => break,
                DeleteStep::Failed if level == 0 => return Ok(false),
                DeleteStep::Failed => {
                    return Err(InobtError::Corruption("join left no parent entry to remove"))
                }
            }
        }
        self.reseat_after_join()?;
        self.tree.stats().inc_deletes();
        Ok(true)
    }

    /// A join at the level below can leave an interior slot at 0, pointing
    /// before its block. The lowest such level is stepped back into the
    /// previous block.
    fn reseat_after_join(&mut self) -> Result<()> {
        for level in 1..self.height() {
            if self.slot(level) == 0 {
                self.decrement(level)?;
                break;
            }
        }
        Ok(())
    }

    fn delete_at_level(&mut self, level: usize) -> Result<DeleteStep> {
        let geo = *self.geo();
        let ptr = self.slot(level);
        if ptr == 0 {
            return Ok(DeleteStep::Failed);
        }
        let buf = self.buf(level)?;
        let (numrecs, new_first, left_sib, right_sib) = {
            let mut data = buf.write();
            let mut node = NodeMut::new(&mut data, &geo);
            let count = node.view().numrecs();
            if ptr > count {
                return Ok(DeleteStep::Failed);
            }
            node.move_entries(ptr + 1, ptr, count - ptr);
            node.set_numrecs(count - 1);
            let view = node.view();
            (count - 1, view.first_key(), view.leftsib(), view.rightsib())
        };
        self.log_entries(&buf, level, ptr, numrecs);
        self.log_numrecs(&buf);

        if level + 1 == self.height() {
            if numrecs == 1 && level > 0 {
                self.collapse_root(level)?;
            } else if level > 0 {
                self.decrement(level)?;
            }
            return Ok(DeleteStep::Done);
        }

        if ptr == 1 {
            if let Some(key) = new_first {
                self.update_key(key, level + 1)?;
            }
        }

        if numrecs >= geo.minrecs(level) {
            if level > 0 {
                self.decrement(level)?;
            }
            return Ok(DeleteStep::Done);
        }

        if left_sib.is_none() && right_sib.is_none() {
            return Err(InobtError::CorruptBlock {
                bno: buf.bno(),
                level: level as u16,
                reason: "non-root block without siblings",
            });
        }

        // Try borrowing an entry first, through a scratch cursor so this
        // cursor's upper levels stay put.
        let mut tcur = self.dup()?;
        let mut lrecs = 0;
        let mut rrecs = 0;
        if right_sib.is_some() {
            tcur.last_rec(level)?;
            if !tcur.increment(level)? || !tcur.last_rec(level)? {
                return Err(InobtError::Corruption("right sibling unreachable during delete"));
            }
            let right_count = tcur.numrecs(level)?;
            if right_count > geo.minrecs(level) && tcur.lshift(level)? {
                drop(tcur);
                if level > 0 {
                    self.decrement(level)?;
                }
                return Ok(DeleteStep::Done);
            }
            rrecs = right_count;
            if left_sib.is_some() {
                tcur.first_rec(level)?;
                tcur.decrement(level)?;
            }
        }
        if left_sib.is_some() {
            tcur.first_rec(level)?;
            if !tcur.decrement(level)? {
                return Err(InobtError::Corruption("left sibling unreachable during delete"));
            }
            tcur.first_rec(level)?;
            let left_count = tcur.numrecs(level)?;
            if left_count > geo.minrecs(level) && tcur.rshift(level)? {
                drop(tcur);
                if level == 0 {
                    self.set_slot(0, self.slot(0) + 1);
                }
                return Ok(DeleteStep::Done);
            }
            lrecs = left_count;
        }
        drop(tcur);

        let maxrecs = geo.maxrecs(level);
        let join = match (left_sib, right_sib) {
            (Some(lbno), _) if lrecs + numrecs <= maxrecs => {
                JoinInto::Left(self.read_node(lbno, level)?)
            }
            (_, Some(rbno)) if rrecs + numrecs <= maxrecs => {
                JoinInto::Current(self.read_node(rbno, level)?)
            }
            _ => {
                warn!(
                    target: "inobt::delete",
                    agno = self.tree.agno().0,
                    bno = buf.bno().0,
                    level,
                    numrecs,
                    "cannot rebalance underfull block"
                );
                if level > 0 {
                    self.decrement(level)?;
                }
                return Ok(DeleteStep::Done);
            }
        };
        self.join(level, join)?;
        Ok(DeleteStep::Joined)
    }

    /// Appends the right block's entries to the left one, unlinks and frees
    /// the right block, and leaves the slot one level up on the entry to be
    /// removed next.
    fn join(&mut self, level: usize, join: JoinInto<'a>) -> Result<()> {
        let geo = *self.geo();
        let current = self.buf(level)?;
        let (survivor, victim, victim_guard, into_left) = match join {
            JoinInto::Left(left) => (left.alias(), current, Some(left), true),
            JoinInto::Current(right) => (current, right.alias(), Some(right), false),
        };

        let (lrecs, rrecs, next) = {
            let mut ldata = survivor.write();
            let mut rdata = victim.write();
            let mut left = NodeMut::new(&mut ldata, &geo);
            let right = NodeMut::new(&mut rdata, &geo);
            let lrecs = left.view().numrecs();
            let rrecs = right.view().numrecs();
            left.copy_entries_from(lrecs + 1, &right.view(), 1, rrecs);
            left.set_numrecs(lrecs + rrecs);
            let next = right.view().rightsib();
            left.set_rightsib(next);
            (lrecs, rrecs, next)
        };
        self.log_entries(&survivor, level, lrecs + 1, lrecs + rrecs);
        self.log_header(&survivor, BB_NUMRECS | BB_RIGHTSIB);

        if into_left {
            if let Some(left) = victim_guard {
                self.set_block(level, left);
            }
            self.set_slot(level, self.slot(level) + lrecs);
        } else {
            drop(victim_guard);
            if level + 1 < self.height() {
                self.increment(level + 1)?;
            }
        }

        if let Some(rr) = next {
            let guard = self.read_node(rr, level)?;
            NodeMut::new(&mut guard.write(), &geo).set_leftsib(Some(survivor.bno()));
            self.log_header(&guard, BB_LEFTSIB);
        }
        self.tx.free_block(victim.bno())?;

        if level > 0 {
            self.set_slot(level, self.slot(level) - 1);
        }

        self.tree.stats().inc_joins(level);
        debug!(
            target: "inobt::delete",
            agno = self.tree.agno().0,
            level,
            survivor = survivor.bno().0,
            freed = victim.bno().0,
            numrecs = lrecs + rrecs,
            "joined blocks"
        );
        Ok(())
    }

    /// Replaces a one-entry interior root with its only child.
    fn collapse_root(&mut self, level: usize) -> Result<()> {
        let child = self.child_at(level, 1)?;
        let old_root = self.buf(level)?.bno();
        let (_, height) = self.tx.root()?;
        self.tx.set_root(child, height - 1)?;
        self.tx.free_block(old_root)?;
        self.levels.pop();
        self.tree.stats().inc_root_collapses();
        debug!(
            target: "inobt::delete",
            agno = self.tree.agno().0,
            freed = old_root.0,
            root = child.0,
            height = height - 1,
            "collapsed root"
        );
        Ok(())
    }

    fn child_at(&self, level: usize, idx: usize) -> Result<BlockRef> {
        let buf = self.buf(level)?;
        let data = buf.read();
        let node = NodeRef::new(&data, self.geo());
        if idx == 0 || idx > node.numrecs() {
            return Err(InobtError::Corruption("root pointer index outside its block"));
        }
        Ok(node.ptr(idx))
    }
}
