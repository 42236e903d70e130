#![forbid(unsafe_code)]

//! Identifiers and the error type shared by every layer of the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Allocation-group-relative block number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct BlockRef(pub u32);

/// Allocation group index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct AgNumber(pub u32);

/// Allocation-group-relative inode number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct AgIno(pub u32);

impl BlockRef {
    /// On-disk encoding of "no block" in sibling fields.
    pub const NULL: BlockRef = BlockRef(u32::MAX);

    /// True for the null sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    /// Maps the on-disk sentinel to `None`.
    pub const fn non_null(self) -> Option<BlockRef> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }

    /// Encodes an optional link, `None` becoming the sentinel.
    pub fn from_link(link: Option<BlockRef>) -> BlockRef {
        link.unwrap_or(BlockRef::NULL)
    }
}

impl AgIno {
    /// Offsets this inode number, failing on overflow of the AG inode space.
    pub fn checked_add(self, delta: u32) -> Option<AgIno> {
        self.0.checked_add(delta).map(AgIno)
    }
}

/// Errors raised by the inode btree and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum InobtError {
    /// The allocator had no block to hand out.
    #[error("no space left for a btree block")]
    NoSpace,
    /// Structural damage detected outside a specific block check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A block failed its header sanity check.
    #[error("corrupt btree block {bno} at level {level}: {reason}")]
    CorruptBlock {
        /// Block that failed the check.
        bno: BlockRef,
        /// Level the block was expected to sit at.
        level: u16,
        /// Which check failed.
        reason: &'static str,
    },
    /// Caller broke an operation contract.
    #[error("logic error: {0}")]
    Logic(&'static str),
    /// Rejected configuration or argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration text could not be parsed.
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

impl InobtError {
    /// True for errors that mean the on-disk structure cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            InobtError::Corruption(_) | InobtError::CorruptBlock { .. }
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, InobtError>;

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for AgNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AgIno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AgIno {
    fn from(value: u32) -> Self {
        AgIno(value)
    }
}

impl From<AgIno> for u32 {
    fn from(value: AgIno) -> Self {
        value.0
    }
}
