#![forbid(unsafe_code)]

use tracing::debug;

use super::block::{BlockHeader, BtreeKind, InobtGeometry, NodeMut, BB_ALL};
use super::cursor::{Cursor, LookupMode};
use super::options::InobtOptions;
use super::record::InobtRec;
use super::stats::{InobtStats, InobtStatsSnapshot};
use crate::primitives::{AgTransaction, BlockGuard};
use crate::types::{AgIno, AgNumber, BlockRef, InobtError, Result};

/// Inode btree of one allocation group.
///
/// The handle carries geometry and statistics only; blocks and the root
/// pointer live in the transaction passed to each call. The caller serialises
/// access per allocation group.
#[derive(Debug)]
pub struct InodeBtree {
    agno: AgNumber,
    options: InobtOptions,
    geometry: InobtGeometry,
    stats: InobtStats,
}

impl InodeBtree {
    /// Creates the handle for `agno`, validating `options`.
    pub fn new(agno: AgNumber, options: InobtOptions) -> Result<Self> {
        let geometry = options.geometry()?;
        Ok(Self {
            agno,
            options,
            geometry,
            stats: InobtStats::default(),
        })
    }

    /// Allocation group this tree indexes.
    pub fn agno(&self) -> AgNumber {
        self.agno
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &InobtOptions {
        &self.options
    }

    /// Derived block geometry.
    pub fn geometry(&self) -> &InobtGeometry {
        &self.geometry
    }

    /// Always [`BtreeKind::Ino`].
    pub fn kind(&self) -> BtreeKind {
        BtreeKind::Ino
    }

    /// Live operation counters.
    pub fn stats(&self) -> &InobtStats {
        &self.stats
    }

    /// Point-in-time copy of the counters.
    pub fn stats_snapshot(&self) -> InobtStatsSnapshot {
        self.stats.snapshot()
    }

    fn check_transaction(&self, tx: &dyn AgTransaction) -> Result<()> {
        if tx.agno() != self.agno {
            return Err(InobtError::Logic("transaction belongs to another allocation group"));
        }
        if tx.block_size() != self.geometry.block_size {
            return Err(InobtError::Invalid("transaction block size differs from the tree's"));
        }
        Ok(())
    }

    /// Allocates and formats an empty leaf as the root of a new tree,
    /// returning its block number.
    pub fn init_empty(&self, tx: &dyn AgTransaction, near: BlockRef) -> Result<BlockRef> {
        self.check_transaction(tx)?;
        let (_, height) = tx.root()?;
        if height != 0 {
            return Err(InobtError::Logic("inode btree already has a root"));
        }
        let bno = tx.allocate_block(near)?;
        {
            let guard = BlockGuard::acquire_new(tx, bno)?;
            NodeMut::new(&mut guard.write(), &self.geometry).init(&BlockHeader {
                magic: self.kind().magic(),
                level: 0,
                numrecs: 0,
                left: None,
                right: None,
            });
            tx.log_mutation(&guard, self.geometry.header_range(BB_ALL));
        }
        tx.set_root(bno, 1)?;
        debug!(target: "inobt::tree", agno = self.agno.0, root = bno.0, "initialised empty inode btree");
        Ok(bno)
    }

    /// Opens an unpositioned cursor over `tx`.
    pub fn cursor<'a>(&'a self, tx: &'a dyn AgTransaction) -> Result<Cursor<'a>> {
        self.check_transaction(tx)?;
        Ok(Cursor::new(self, tx))
    }

    /// Current height recorded in the allocation group header.
    pub fn height(&self, tx: &dyn AgTransaction) -> Result<u16> {
        self.check_transaction(tx)?;
        Ok(tx.root()?.1)
    }

    /// Visits every record in key order. Returns how many were visited.
    pub fn for_each_record<F>(&self, tx: &dyn AgTransaction, mut visit: F) -> Result<u64>
    where
        F: FnMut(&InobtRec) -> Result<()>,
    {
        let mut cur = self.cursor(tx)?;
        if !cur.lookup(AgIno(0), LookupMode::Ge)? {
            return Ok(0);
        }
        let mut visited = 0;
        while let Some(rec) = cur.get_record()? {
            visit(&rec)?;
            visited += 1;
            if !cur.increment(0)? {
                break;
            }
        }
        Ok(visited)
    }
}
