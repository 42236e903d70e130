//! Collaborators the inode btree is built on.
//!
//! The btree never touches a device directly: it reads and writes blocks
//! through a buffer cache, asks an allocator for blocks, and records its root
//! in the allocation-group header. Each concern is a trait here, together with
//! an in-memory allocation group implementing all of them.

/// Allocation-group header access.
pub mod agi;

/// Block allocation and the in-memory free-extent allocator.
pub mod alloc;

/// Buffer cache interface and scoped block handles.
pub mod buffer;

/// In-memory, transactional allocation group.
pub mod memag;

pub use agi::{AgHeader, AgTransaction};
pub use alloc::{BlockAllocator, FreeExtents};
pub use buffer::{BlockGuard, BufferCache, NodeHandle};
pub use memag::{MemAllocGroup, MemAllocGroupStats};
