#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use super::block::{check_block, BlockExpectation, NodeRef};
use super::record::INODES_PER_CHUNK;
use super::tree::InodeBtree;
use crate::primitives::{AgTransaction, BlockGuard};
use crate::types::{AgIno, BlockRef, InobtError, Result};

/// Shape and contents of a tree that passed [`InodeBtree::verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Levels from leaf to root.
    pub height: u16,
    /// Blocks found at each level, leaves first.
    pub blocks_per_level: Vec<u64>,
    /// Leaf records.
    pub records: u64,
    /// Sum of the records' free counts.
    pub free_inodes: u64,
}

impl VerifyReport {
    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Total blocks the tree occupies.
    pub fn total_blocks(&self) -> u64 {
        self.blocks_per_level.iter().sum()
    }
}

fn corrupt(bno: BlockRef, level: usize, reason: &'static str) -> InobtError {
    warn!(target: "inobt::verify", bno = bno.0, level, reason, "inode btree verification failed");
    InobtError::CorruptBlock {
        bno,
        level: level as u16,
        reason,
    }
}

/// Block expected at one position of a level, with the separator its parent
/// holds for it.
struct Expected {
    bno: BlockRef,
    separator: Option<AgIno>,
}

impl InodeBtree {
    /// Walks the whole tree level by level and checks its structure.
    ///
    /// Every block is read once. Each level must form one sibling chain in
    /// key order matching its parent's pointers; non-root blocks must hold
    /// at least `MINRECS` entries and each separator must equal its child's
    /// first key. Leaf records must have a free count matching their mask.
    pub fn verify(&self, tx: &dyn AgTransaction) -> Result<VerifyReport> {
        let height = self.height(tx)?;
        if height == 0 {
            return Err(InobtError::Corruption("inode btree has no root"));
        }
        if height > self.geometry().max_levels {
            return Err(InobtError::Corruption("inode btree taller than its maximum height"));
        }
        let (root, _) = tx.root()?;
        let geo = *self.geometry();
        let mut report = VerifyReport {
            height,
            blocks_per_level: vec![0; usize::from(height)],
            ..VerifyReport::default()
        };
        let mut seen = HashSet::new();
        let mut expected = vec![Expected {
            bno: root,
            separator: None,
        }];

        for level in (0..usize::from(height)).rev() {
            let is_root_level = level + 1 == usize::from(height);
            let mut below = Vec::new();
            let mut last_key: Option<AgIno> = None;
            for (idx, want) in expected.iter().enumerate() {
                let bno = want.bno;
                if !seen.insert(bno) {
                    return Err(corrupt(bno, level, "block reachable twice"));
                }
                let guard = BlockGuard::acquire(tx, bno)?;
                let data = guard.read();
                let header = check_block(
                    &data,
                    &geo,
                    &BlockExpectation {
                        kind: self.kind(),
                        bno,
                        level: level as u16,
                        ag_blocks: tx.ag_blocks(),
                    },
                )?;
                let prev = idx.checked_sub(1).map(|i| expected[i].bno);
                let next = expected.get(idx + 1).map(|e| e.bno);
                if header.left != prev {
                    return Err(corrupt(bno, level, "left sibling link broken"));
                }
                if header.right != next {
                    return Err(corrupt(bno, level, "right sibling link broken"));
                }

                let node = NodeRef::new(&data, &geo);
                let count = node.numrecs();
                if is_root_level {
                    if level > 0 && count == 0 {
                        return Err(corrupt(bno, level, "empty interior root"));
                    }
                } else if count < geo.minrecs(level) {
                    return Err(corrupt(bno, level, "block below minimum fill"));
                }
                if let Some(separator) = want.separator {
                    if node.first_key() != Some(separator) {
                        return Err(corrupt(bno, level, "separator differs from child's first key"));
                    }
                }

                for slot in 1..=count {
                    let key = node.entry_key(slot);
                    if last_key.is_some_and(|last| last >= key) {
                        return Err(corrupt(bno, level, "keys out of order"));
                    }
                    last_key = Some(key);
                    if level == 0 {
                        let rec = node.rec(slot);
                        if !rec.is_consistent() || rec.free_count > INODES_PER_CHUNK as i32 {
                            return Err(corrupt(bno, level, "free count disagrees with free mask"));
                        }
                        report.records += 1;
                        report.free_inodes += rec.free_count as u64;
                    } else {
                        below.push(Expected {
                            bno: node.ptr(slot),
                            separator: Some(key),
                        });
                    }
                }
            }
            report.blocks_per_level[level] = expected.len() as u64;
            expected = below;
        }

        debug!(
            target: "inobt::verify",
            agno = self.agno().0,
            height,
            records = report.records,
            blocks = report.total_blocks(),
            "inode btree verified"
        );
        Ok(report)
    }
}
