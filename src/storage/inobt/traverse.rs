use super::cursor::Cursor;
use crate::types::{InobtError, Result};

impl<'a> Cursor<'a> {
    /// Moves the slot at `level` one entry right, crossing into the right
    /// sibling when needed. Returns false at the right edge of the tree,
    /// leaving the slot one past the last entry.
    pub fn increment(&mut self, level: usize) -> Result<bool> {
        let header = self.header(level)?;
        let numrecs = usize::from(header.numrecs);
        let slot = self.slot(level);
        if slot < numrecs {
            self.set_slot(level, slot + 1);
            return Ok(true);
        }
        self.set_slot(level, numrecs + 1);
        if header.right.is_none() {
            return Ok(false);
        }

        // Climb until an ancestor still has an entry to its right.
        let mut lev = level + 1;
        loop {
            if lev >= self.height() {
                return Err(InobtError::Corruption("right sibling not reachable from the root"));
            }
            let count = self.numrecs(lev)?;
            let slot = self.slot(lev);
            if slot < count {
                self.set_slot(lev, slot + 1);
                break;
            }
            self.set_slot(lev, count + 1);
            lev += 1;
        }

        // Come back down along the leftmost edge of that subtree.
        while lev > level {
            let bno = self.child_ptr(lev)?;
            lev -= 1;
            let guard = self.read_node(bno, lev)?;
            self.set_block(lev, guard);
            self.set_slot(lev, 1);
        }
        Ok(true)
    }

    /// Mirror of [`Cursor::increment`]; returns false at the left edge of the
    /// tree, leaving the slot at 0.
    pub fn decrement(&mut self, level: usize) -> Result<bool> {
        let header = self.header(level)?;
        let slot = self.slot(level);
        if slot > 1 {
            self.set_slot(level, slot - 1);
            return Ok(true);
        }
        self.set_slot(level, 0);
        if header.left.is_none() {
            return Ok(false);
        }

        let mut lev = level + 1;
        loop {
            if lev >= self.height() {
                return Err(InobtError::Corruption("left sibling not reachable from the root"));
            }
            let slot = self.slot(lev);
            if slot > 1 {
                self.set_slot(lev, slot - 1);
                break;
            }
            self.set_slot(lev, 0);
            lev += 1;
        }

        while lev > level {
            let bno = self.child_ptr(lev)?;
            lev -= 1;
            let guard = self.read_node(bno, lev)?;
            self.set_block(lev, guard);
            let last = self.numrecs(lev)?;
            self.set_slot(lev, last);
        }
        Ok(true)
    }

    /// Points `level` at its block's first entry; false for an empty block.
    pub(crate) fn first_rec(&mut self, level: usize) -> Result<bool> {
        if self.numrecs(level)? == 0 {
            return Ok(false);
        }
        self.set_slot(level, 1);
        Ok(true)
    }

    /// Points `level` at its block's last entry; false for an empty block.
    pub(crate) fn last_rec(&mut self, level: usize) -> Result<bool> {
        let numrecs = self.numrecs(level)?;
        if numrecs == 0 {
            return Ok(false);
        }
        self.set_slot(level, numrecs);
        Ok(true)
    }
}
