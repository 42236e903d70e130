#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::AgIno;

/// Inodes covered by one record.
pub const INODES_PER_CHUNK: u32 = 64;

/// Encoded size of a leaf record.
pub const REC_LEN: usize = 16;

/// Bitmap of free inodes in a chunk; bit `i` set means inode `start + i` is free.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub struct FreeMask(pub u64);

impl FreeMask {
    /// Every inode free.
    pub const ALL_FREE: FreeMask = FreeMask(u64::MAX);
    /// Every inode in use.
    pub const NONE_FREE: FreeMask = FreeMask(0);

    /// True when inode `offset` of the chunk is free.
    pub fn is_free(self, offset: u32) -> bool {
        offset < INODES_PER_CHUNK && self.0 & (1u64 << offset) != 0
    }

    /// Marks inode `offset` free.
    pub fn set(&mut self, offset: u32) {
        if offset < INODES_PER_CHUNK {
            self.0 |= 1u64 << offset;
        }
    }

    /// Marks inode `offset` in use.
    pub fn clear(&mut self, offset: u32) {
        if offset < INODES_PER_CHUNK {
            self.0 &= !(1u64 << offset);
        }
    }

    /// Number of free inodes.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest free offset.
    pub fn first_free(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }
}

impl fmt::Debug for FreeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FreeMask({:#018x})", self.0)
    }
}

/// Leaf record of the inode btree: one 64-inode chunk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InobtRec {
    /// First inode of the chunk; the record's key.
    pub start_ino: AgIno,
    /// Number of free inodes in the chunk.
    pub free_count: i32,
    /// Which inodes are free.
    pub free_mask: FreeMask,
}

impl InobtRec {
    /// Record for a freshly allocated chunk with every inode free.
    pub fn new_chunk(start_ino: AgIno) -> Self {
        Self {
            start_ino,
            free_count: INODES_PER_CHUNK as i32,
            free_mask: FreeMask::ALL_FREE,
        }
    }

    /// Decodes a record from its 16 big-endian bytes.
    pub fn decode(bytes: &[u8]) -> Self {
        let start = u32::from_be_bytes(bytes[0..4].try_into().unwrap_or([0; 4]));
        let free_count = i32::from_be_bytes(bytes[4..8].try_into().unwrap_or([0; 4]));
        let free_mask = u64::from_be_bytes(bytes[8..16].try_into().unwrap_or([0; 8]));
        Self {
            start_ino: AgIno(start),
            free_count,
            free_mask: FreeMask(free_mask),
        }
    }

    /// Encodes the record into 16 big-endian bytes.
    pub fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.start_ino.0.to_be_bytes());
        out[4..8].copy_from_slice(&self.free_count.to_be_bytes());
        out[8..16].copy_from_slice(&self.free_mask.0.to_be_bytes());
    }

    /// True when `ino` falls inside this chunk.
    pub fn contains(&self, ino: AgIno) -> bool {
        ino.0 >= self.start_ino.0 && u64::from(ino.0) < u64::from(self.start_ino.0) + 64
    }

    /// First free inode of the chunk.
    pub fn first_free(&self) -> Option<AgIno> {
        self.free_mask
            .first_free()
            .and_then(|offset| self.start_ino.checked_add(offset))
    }

    /// Marks inode `offset` allocated. Returns false if it was already in use.
    pub fn take_inode(&mut self, offset: u32) -> bool {
        if !self.free_mask.is_free(offset) {
            return false;
        }
        self.free_mask.clear(offset);
        self.free_count -= 1;
        true
    }

    /// Marks inode `offset` free again. Returns false if it was already free.
    pub fn release_inode(&mut self, offset: u32) -> bool {
        if offset >= INODES_PER_CHUNK || self.free_mask.is_free(offset) {
            return false;
        }
        self.free_mask.set(offset);
        self.free_count += 1;
        true
    }

    /// Free count agrees with the mask.
    pub fn is_consistent(&self) -> bool {
        self.free_count >= 0 && self.free_count as u32 == self.free_mask.count()
    }
}
