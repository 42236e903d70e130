//! On-disk index structures.

/// Per-allocation-group inode allocation B+tree.
///
/// Maps inode-chunk start numbers to free-inode bitmaps and keeps itself
/// balanced through split, shift, join and root growth or collapse.
pub mod inobt;
