use tracing::trace;

use super::block::{NodeMut, NodeRef};
use super::cursor::{Cursor, Held};
use crate::types::{InobtError, Result};

impl<'a> Cursor<'a> {
    /// Moves the first entry of the cursor's block at `level` to the end of
    /// its left sibling. The slot follows the entries it pointed at.
    ///
    /// Refused (false) when there is no left sibling, the sibling is full, or
    /// the cursor sits on the entry that would move.
    pub(crate) fn lshift(&mut self, level: usize) -> Result<bool> {
        let geo = *self.geo();
        let header = self.header(level)?;
        let Some(lbno) = header.left else {
            return Ok(false);
        };
        if self.slot(level) <= 1 {
            return Ok(false);
        }
        let left = self.read_node(lbno, level)?;
        let lrecs = self.count_in(&left)?;
        let rrecs = usize::from(header.numrecs);
        if lrecs == geo.maxrecs(level) || rrecs < 2 {
            return Ok(false);
        }
        let right = self.buf(level)?;

        let new_first = {
            let mut ldata = left.write();
            let mut rdata = right.write();
            let mut lnode = NodeMut::new(&mut ldata, &geo);
            let mut rnode = NodeMut::new(&mut rdata, &geo);
            lnode.copy_entries_from(lrecs + 1, &rnode.view(), 1, 1);
            lnode.set_numrecs(lrecs + 1);
            rnode.move_entries(2, 1, rrecs - 1);
            rnode.set_numrecs(rrecs - 1);
            rnode.view().entry_key(1)
        };
        self.log_entries(&left, level, lrecs + 1, lrecs + 1);
        self.log_numrecs(&left);
        self.log_entries(&right, level, 1, rrecs - 1);
        self.log_numrecs(&right);

        self.update_key(new_first, level + 1)?;
        self.set_slot(level, self.slot(level) - 1);
        self.tree.stats().inc_left_shifts();
        trace!(target: "inobt::shift", level, from = right.bno().0, to = lbno.0, "left shift");
        Ok(true)
    }

    /// Moves the last entry of the cursor's block at `level` to the front of
    /// its right sibling and re-keys the sibling's parent entry.
    ///
    /// Refused (false) when there is no right sibling, the sibling is full,
    /// or the cursor sits on the last entry.
    pub(crate) fn rshift(&mut self, level: usize) -> Result<bool> {
        let geo = *self.geo();
        let header = self.header(level)?;
        let Some(rbno) = header.right else {
            return Ok(false);
        };
        let lrecs = usize::from(header.numrecs);
        if self.slot(level) >= lrecs {
            return Ok(false);
        }
        let right = self.read_node(rbno, level)?;
        let rrecs = self.count_in(&right)?;
        if rrecs == geo.maxrecs(level) {
            return Ok(false);
        }
        let left = self.buf(level)?;

        let moved = {
            let mut ldata = left.write();
            let mut rdata = right.write();
            let mut lnode = NodeMut::new(&mut ldata, &geo);
            let mut rnode = NodeMut::new(&mut rdata, &geo);
            rnode.move_entries(1, 2, rrecs);
            rnode.copy_entries_from(1, &lnode.view(), lrecs, 1);
            rnode.set_numrecs(rrecs + 1);
            lnode.set_numrecs(lrecs - 1);
            rnode.view().entry_key(1)
        };
        self.log_numrecs(&left);
        self.log_entries(&right, level, 1, rrecs + 1);
        self.log_numrecs(&right);

        // Walk a scratch cursor onto the right block to fix its separator.
        let mut tcur = self.dup()?;
        tcur.last_rec(level)?;
        if !tcur.increment(level)? {
            return Err(InobtError::Corruption("right sibling unreachable after shift"));
        }
        tcur.update_key(moved, level + 1)?;
        self.tree.stats().inc_right_shifts();
        trace!(target: "inobt::shift", level, from = left.bno().0, to = rbno.0, "right shift");
        Ok(true)
    }

    fn count_in(&self, guard: &Held<'a>) -> Result<usize> {
        let data = guard.read();
        Ok(NodeRef::new(&data, self.geo()).numrecs())
    }
}
