//! Inode allocation B+tree for an XFS-style allocation group.
//!
//! [`storage::inobt`] holds the btree engine: a cursor that records the
//! block and slot visited at every level, with lookup, traversal, insert
//! (shift, split, new root) and delete (borrow, join, root collapse).
//! [`primitives`] defines the buffer cache, block allocator and allocation
//! group header it runs against, plus an in-memory allocation group.

#![warn(missing_docs)]

pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::{AgTransaction, MemAllocGroup};
pub use storage::inobt::{Cursor, InobtOptions, InobtRec, InodeBtree, LookupMode};
pub use types::{AgIno, AgNumber, BlockRef, InobtError, Result};
