use std::cmp::Ordering;

use tracing::trace;

use super::block::NodeRef;
use super::cursor::{Cursor, LookupMode};
use crate::types::{AgIno, InobtError, Result};

impl<'a> Cursor<'a> {
    /// Positions the cursor for `key` and reports whether a record matching
    /// `mode` was found.
    ///
    /// On a miss the leaf slot is the insertion point for `key` (`Eq`), one
    /// past the last record (`Ge`) or 0 (`Le`).
    pub fn lookup(&mut self, key: AgIno, mode: LookupMode) -> Result<bool> {
        self.tree.stats().inc_lookups();
        self.seek(key, mode)
    }

    /// [`Cursor::lookup`] without counting it; used to re-seat after a split.
    pub(super) fn seek(&mut self, key: AgIno, mode: LookupMode) -> Result<bool> {
        let (root, height) = self.tx.root()?;
        self.reset_height(height)?;
        let geo = *self.geo();

        let mut bno = root;
        let mut diff = Ordering::Greater;
        let mut keyno = 0usize;
        for level in (0..usize::from(height)).rev() {
            self.load_level(level, bno)?;
            let buf = self.buf(level)?;
            let data = buf.read();
            let node = NodeRef::new(&data, &geo);

            if diff == Ordering::Equal {
                // An exact hit above pins every lower level to its first entry.
                keyno = 1;
            } else {
                let count = node.numrecs();
                if count == 0 {
                    if level != 0 || height != 1 {
                        return Err(InobtError::CorruptBlock {
                            bno: buf.bno(),
                            level: level as u16,
                            reason: "empty block below the root",
                        });
                    }
                    self.set_slot(0, usize::from(mode != LookupMode::Le));
                    return Ok(false);
                }
                let (mut low, mut high) = (1usize, count);
                while low <= high {
                    keyno = (low + high) / 2;
                    diff = node.entry_key(keyno).cmp(&key);
                    match diff {
                        Ordering::Less => low = keyno + 1,
                        Ordering::Greater => high = keyno - 1,
                        Ordering::Equal => break,
                    }
                }
            }

            if level > 0 {
                if diff == Ordering::Greater && keyno > 1 {
                    keyno -= 1;
                }
                bno = node.ptr(keyno);
                self.set_slot(level, keyno);
            }
        }

        let leaf = self.header(0)?;
        let numrecs = usize::from(leaf.numrecs);
        if mode != LookupMode::Le && diff == Ordering::Less {
            keyno += 1;
            if mode == LookupMode::Ge && keyno > numrecs && leaf.right.is_some() {
                self.set_slot(0, keyno);
                if !self.increment(0)? {
                    return Err(InobtError::Corruption("right sibling unreachable during lookup"));
                }
                trace!(target: "inobt::lookup", key = key.0, ?mode, "stepped into right sibling");
                return Ok(true);
            }
        } else if mode == LookupMode::Le && diff == Ordering::Greater {
            keyno -= 1;
        }
        self.set_slot(0, keyno);

        let found = keyno >= 1 && keyno <= numrecs && (mode != LookupMode::Eq || diff == Ordering::Equal);
        trace!(target: "inobt::lookup", key = key.0, ?mode, slot = keyno, found, "lookup");
        Ok(found)
    }

    /// Exact-match lookup.
    pub fn lookup_eq(&mut self, key: AgIno) -> Result<bool> {
        self.lookup(key, LookupMode::Eq)
    }

    /// First record at or after `key`.
    pub fn lookup_ge(&mut self, key: AgIno) -> Result<bool> {
        self.lookup(key, LookupMode::Ge)
    }

    /// Last record at or before `key`.
    pub fn lookup_le(&mut self, key: AgIno) -> Result<bool> {
        self.lookup(key, LookupMode::Le)
    }
}
