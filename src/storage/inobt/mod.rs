#![forbid(unsafe_code)]

//! Per-allocation-group inode allocation B+tree.
//!
//! Records map the first inode of each 64-inode chunk to the chunk's free
//! bitmap. All access goes through a [`Cursor`] opened on an [`InodeBtree`]
//! for one allocation-group transaction; the cursor remembers the block and
//! slot it visited at every level and releases those blocks when dropped.

/// Short-form block format and geometry.
pub mod block;
/// Leaf record and free-inode mask.
pub mod record;

mod cursor;
mod delete;
mod insert;
mod keys;
mod lookup;
mod options;
mod shift;
mod stats;
mod traverse;
mod tree;
mod verify;

pub use block::{BtreeKind, Entry, InobtGeometry};
pub use cursor::{Cursor, LookupMode};
pub use options::InobtOptions;
pub use record::{FreeMask, InobtRec, INODES_PER_CHUNK};
pub use stats::{InobtStats, InobtStatsSnapshot};
pub use tree::InodeBtree;
pub use verify::VerifyReport;
