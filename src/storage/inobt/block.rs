#![forbid(unsafe_code)]

//! Short-form btree block layout.
//!
//! ```text
//! 0      4      6        8         12        16
//! | magic | level | numrecs | leftsib | rightsib | entries ...
//! ```
//!
//! Leaves pack 16-byte records after the header. Interior blocks hold
//! `node_maxrecs` 4-byte keys followed by the 4-byte child pointers, so the
//! pointer array starts at the same offset in every interior block of a tree.
//! Entry indices are 1-based throughout.

use std::ops::Range;

use smallvec::SmallVec;
use tracing::warn;

use super::record::{InobtRec, REC_LEN};
use crate::types::{AgIno, BlockRef, InobtError, Result};

/// Length of the block header.
pub const BLOCK_HDR_LEN: usize = 16;
/// Encoded size of an interior key.
pub const KEY_LEN: usize = 4;
/// Encoded size of a child pointer.
pub const PTR_LEN: usize = 4;

const MAGIC_OFFSET: usize = 0;
const LEVEL_OFFSET: usize = 4;
const NUMRECS_OFFSET: usize = 6;
const LEFTSIB_OFFSET: usize = 8;
const RIGHTSIB_OFFSET: usize = 12;

/// Header field bits for [`InobtGeometry::header_range`].
pub const BB_MAGIC: u8 = 1 << 0;
/// Level field.
pub const BB_LEVEL: u8 = 1 << 1;
/// Record count field.
pub const BB_NUMRECS: u8 = 1 << 2;
/// Left sibling field.
pub const BB_LEFTSIB: u8 = 1 << 3;
/// Right sibling field.
pub const BB_RIGHTSIB: u8 = 1 << 4;
/// Whole header.
pub const BB_ALL: u8 = BB_MAGIC | BB_LEVEL | BB_NUMRECS | BB_LEFTSIB | BB_RIGHTSIB;

const FIELD_SPANS: [(u8, usize, usize); 5] = [
    (BB_MAGIC, MAGIC_OFFSET, LEVEL_OFFSET),
    (BB_LEVEL, LEVEL_OFFSET, NUMRECS_OFFSET),
    (BB_NUMRECS, NUMRECS_OFFSET, LEFTSIB_OFFSET),
    (BB_LEFTSIB, LEFTSIB_OFFSET, RIGHTSIB_OFFSET),
    (BB_RIGHTSIB, RIGHTSIB_OFFSET, BLOCK_HDR_LEN),
];

/// Btree flavours sharing the short-form block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BtreeKind {
    /// Free space by block number.
    Bno = 0,
    /// Free space by extent size.
    Cnt = 1,
    /// File block map.
    Bmap = 2,
    /// Inode chunks.
    Ino = 3,
}

const BTREE_MAGICS: [u32; 4] = [
    0x4142_5442, // ABTB
    0x4142_5443, // ABTC
    0x424d_4150, // BMAP
    0x4941_4254, // IABT
];

impl BtreeKind {
    /// Every kind, in table order.
    pub const ALL: [BtreeKind; 4] = [
        BtreeKind::Bno,
        BtreeKind::Cnt,
        BtreeKind::Bmap,
        BtreeKind::Ino,
    ];

    /// Magic number stamped into blocks of this kind.
    pub const fn magic(self) -> u32 {
        BTREE_MAGICS[self as usize]
    }

    /// Kind owning `magic`, if any.
    pub fn from_magic(magic: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.magic() == magic)
    }
}

/// Entry carried into a block: a record at the leaves, a key and child
/// pointer above them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Entry {
    /// Leaf record.
    Rec(InobtRec),
    /// Interior key and the child it leads to.
    Child {
        /// Lowest key reachable through `ptr`.
        key: AgIno,
        /// Child block.
        ptr: BlockRef,
    },
}

impl Entry {
    /// Ordering key of the entry.
    pub fn key(&self) -> AgIno {
        match self {
            Entry::Rec(rec) => rec.start_ino,
            Entry::Child { key, .. } => *key,
        }
    }
}

/// Per-tree block geometry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InobtGeometry {
    /// Block size in bytes.
    pub block_size: usize,
    /// Maximum records in a leaf.
    pub leaf_maxrecs: u16,
    /// Maximum keys in an interior block.
    pub node_maxrecs: u16,
    /// Tallest tree the inode space can need.
    pub max_levels: u16,
}

impl InobtGeometry {
    /// Records that physically fit in a leaf of `block_size` bytes.
    pub fn leaf_capacity(block_size: usize) -> usize {
        block_size.saturating_sub(BLOCK_HDR_LEN) / REC_LEN
    }

    /// Key/pointer pairs that physically fit in an interior block.
    pub fn node_capacity(block_size: usize) -> usize {
        block_size.saturating_sub(BLOCK_HDR_LEN) / (KEY_LEN + PTR_LEN)
    }

    /// `MAXRECS` for `level`.
    pub fn maxrecs(&self, level: usize) -> usize {
        if level == 0 {
            usize::from(self.leaf_maxrecs)
        } else {
            usize::from(self.node_maxrecs)
        }
    }

    /// `MINRECS` for `level`.
    pub fn minrecs(&self, level: usize) -> usize {
        self.maxrecs(level) / 2
    }

    /// Byte span covering the header fields in `fields`.
    pub fn header_range(&self, fields: u8) -> Range<usize> {
        let mut start = BLOCK_HDR_LEN;
        let mut end = 0;
        for (bit, lo, hi) in FIELD_SPANS {
            if fields & bit != 0 {
                start = start.min(lo);
                end = end.max(hi);
            }
        }
        if end == 0 {
            0..0
        } else {
            start..end
        }
    }

    fn rec_offset(&self, idx: usize) -> usize {
        BLOCK_HDR_LEN + (idx - 1) * REC_LEN
    }

    fn key_offset(&self, idx: usize) -> usize {
        BLOCK_HDR_LEN + (idx - 1) * KEY_LEN
    }

    fn ptr_offset(&self, idx: usize) -> usize {
        BLOCK_HDR_LEN + usize::from(self.node_maxrecs) * KEY_LEN + (idx - 1) * PTR_LEN
    }

    /// Byte spans holding entries `first..=last` of a block at `level`.
    pub fn entry_ranges(&self, level: usize, first: usize, last: usize) -> SmallVec<[Range<usize>; 2]> {
        let mut ranges = SmallVec::new();
        if first == 0 || first > last {
            return ranges;
        }
        if level == 0 {
            ranges.push(self.rec_offset(first)..self.rec_offset(last) + REC_LEN);
        } else {
            ranges.push(self.key_offset(first)..self.key_offset(last) + KEY_LEN);
            ranges.push(self.ptr_offset(first)..self.ptr_offset(last) + PTR_LEN);
        }
        ranges
    }
}

/// Decoded block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Magic number.
    pub magic: u32,
    /// Height above the leaves.
    pub level: u16,
    /// Entries in use.
    pub numrecs: u16,
    /// Left neighbour at the same level.
    pub left: Option<BlockRef>,
    /// Right neighbour at the same level.
    pub right: Option<BlockRef>,
}

impl BlockHeader {
    /// Decodes the header of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HDR_LEN {
            return Err(InobtError::Corruption("block shorter than its header"));
        }
        Ok(Self {
            magic: read_u32(data, MAGIC_OFFSET),
            level: read_u16(data, LEVEL_OFFSET),
            numrecs: read_u16(data, NUMRECS_OFFSET),
            left: BlockRef(read_u32(data, LEFTSIB_OFFSET)).non_null(),
            right: BlockRef(read_u32(data, RIGHTSIB_OFFSET)).non_null(),
        })
    }

    /// Encodes the header into `data`.
    pub fn write(&self, data: &mut [u8]) {
        write_u32(data, MAGIC_OFFSET, self.magic);
        write_u16(data, LEVEL_OFFSET, self.level);
        write_u16(data, NUMRECS_OFFSET, self.numrecs);
        write_u32(data, LEFTSIB_OFFSET, BlockRef::from_link(self.left).0);
        write_u32(data, RIGHTSIB_OFFSET, BlockRef::from_link(self.right).0);
    }
}

/// Where a block sits and what it must look like.
#[derive(Clone, Copy, Debug)]
pub struct BlockExpectation {
    /// Btree the block belongs to.
    pub kind: BtreeKind,
    /// Block number it was read from.
    pub bno: BlockRef,
    /// Level the parent says it sits at.
    pub level: u16,
    /// Blocks in the allocation group.
    pub ag_blocks: u32,
}

/// Sanity check run on every block read. Underfull blocks pass: they are
/// legitimate in the middle of a delete.
pub fn check_block(data: &[u8], geo: &InobtGeometry, expect: &BlockExpectation) -> Result<BlockHeader> {
    let corrupt = |reason: &'static str| {
        warn!(
            target: "inobt::block",
            bno = expect.bno.0,
            level = expect.level,
            reason,
            "corrupt btree block"
        );
        InobtError::CorruptBlock {
            bno: expect.bno,
            level: expect.level,
            reason,
        }
    };
    if data.len() != geo.block_size {
        return Err(corrupt("block size mismatch"));
    }
    let header = BlockHeader::parse(data)?;
    if header.magic != expect.kind.magic() {
        return Err(corrupt("bad magic"));
    }
    if header.level != expect.level {
        return Err(corrupt("unexpected level"));
    }
    if usize::from(header.numrecs) > geo.maxrecs(usize::from(header.level)) {
        return Err(corrupt("record count above maximum"));
    }
    for sibling in [header.left, header.right].into_iter().flatten() {
        if sibling.0 >= expect.ag_blocks {
            return Err(corrupt("sibling outside allocation group"));
        }
        if sibling == expect.bno {
            return Err(corrupt("sibling points at itself"));
        }
    }
    Ok(header)
}

/// Read-only view over a block image.
#[derive(Clone, Copy)]
pub struct NodeRef<'b> {
    data: &'b [u8],
    geo: InobtGeometry,
}

impl<'b> NodeRef<'b> {
    /// Views `data` with the tree's geometry.
    pub fn new(data: &'b [u8], geo: &InobtGeometry) -> Self {
        Self { data, geo: *geo }
    }

    /// Level field.
    pub fn level(&self) -> usize {
        usize::from(read_u16(self.data, LEVEL_OFFSET))
    }

    /// Entries in use.
    pub fn numrecs(&self) -> usize {
        usize::from(read_u16(self.data, NUMRECS_OFFSET))
    }

    /// Left sibling.
    pub fn leftsib(&self) -> Option<BlockRef> {
        BlockRef(read_u32(self.data, LEFTSIB_OFFSET)).non_null()
    }

    /// Right sibling.
    pub fn rightsib(&self) -> Option<BlockRef> {
        BlockRef(read_u32(self.data, RIGHTSIB_OFFSET)).non_null()
    }

    /// Leaf record `idx`.
    pub fn rec(&self, idx: usize) -> InobtRec {
        let off = self.geo.rec_offset(idx);
        InobtRec::decode(&self.data[off..off + REC_LEN])
    }

    /// Interior key `idx`.
    pub fn key(&self, idx: usize) -> AgIno {
        AgIno(read_u32(self.data, self.geo.key_offset(idx)))
    }

    /// Child pointer `idx`.
    pub fn ptr(&self, idx: usize) -> BlockRef {
        BlockRef(read_u32(self.data, self.geo.ptr_offset(idx)))
    }

    /// Key of entry `idx` whatever the level.
    pub fn entry_key(&self, idx: usize) -> AgIno {
        if self.level() == 0 {
            self.rec(idx).start_ino
        } else {
            self.key(idx)
        }
    }

    /// Entry `idx` whatever the level.
    pub fn entry(&self, idx: usize) -> Entry {
        if self.level() == 0 {
            Entry::Rec(self.rec(idx))
        } else {
            Entry::Child {
                key: self.key(idx),
                ptr: self.ptr(idx),
            }
        }
    }

    /// Key of the first entry, if the block is not empty.
    pub fn first_key(&self) -> Option<AgIno> {
        (self.numrecs() > 0).then(|| self.entry_key(1))
    }
}

/// Mutable view over a block image.
pub struct NodeMut<'b> {
    data: &'b mut [u8],
    geo: InobtGeometry,
}

impl<'b> NodeMut<'b> {
    /// Views `data` with the tree's geometry.
    pub fn new(data: &'b mut [u8], geo: &InobtGeometry) -> Self {
        Self { data, geo: *geo }
    }

    /// Read-only view of the same bytes.
    pub fn view(&self) -> NodeRef<'_> {
        NodeRef {
            data: &*self.data,
            geo: self.geo,
        }
    }

    /// Stamps a complete header.
    pub fn init(&mut self, header: &BlockHeader) {
        header.write(self.data);
    }

    /// Sets the entry count.
    pub fn set_numrecs(&mut self, numrecs: usize) {
        write_u16(self.data, NUMRECS_OFFSET, numrecs as u16);
    }

    /// Sets the left sibling.
    pub fn set_leftsib(&mut self, sib: Option<BlockRef>) {
        write_u32(self.data, LEFTSIB_OFFSET, BlockRef::from_link(sib).0);
    }

    /// Sets the right sibling.
    pub fn set_rightsib(&mut self, sib: Option<BlockRef>) {
        write_u32(self.data, RIGHTSIB_OFFSET, BlockRef::from_link(sib).0);
    }

    /// Overwrites leaf record `idx`.
    pub fn set_rec(&mut self, idx: usize, rec: &InobtRec) {
        let off = self.geo.rec_offset(idx);
        rec.encode(&mut self.data[off..off + REC_LEN]);
    }

    /// Overwrites interior key `idx`.
    pub fn set_key(&mut self, idx: usize, key: AgIno) {
        let off = self.geo.key_offset(idx);
        write_u32(self.data, off, key.0);
    }

    /// Overwrites child pointer `idx`.
    pub fn set_ptr(&mut self, idx: usize, ptr: BlockRef) {
        let off = self.geo.ptr_offset(idx);
        write_u32(self.data, off, ptr.0);
    }

    /// Overwrites entry `idx`.
    pub fn set_entry(&mut self, idx: usize, entry: &Entry) {
        match entry {
            Entry::Rec(rec) => self.set_rec(idx, rec),
            Entry::Child { key, ptr } => {
                self.set_key(idx, *key);
                self.set_ptr(idx, *ptr);
            }
        }
    }

    /// Moves `count` entries starting at `src` so they start at `dst`.
    pub fn move_entries(&mut self, src: usize, dst: usize, count: usize) {
        if count == 0 || src == dst {
            return;
        }
        if self.view().level() == 0 {
            let from = self.geo.rec_offset(src);
            self.data
                .copy_within(from..from + count * REC_LEN, self.geo.rec_offset(dst));
        } else {
            let from = self.geo.key_offset(src);
            self.data
                .copy_within(from..from + count * KEY_LEN, self.geo.key_offset(dst));
            let from = self.geo.ptr_offset(src);
            self.data
                .copy_within(from..from + count * PTR_LEN, self.geo.ptr_offset(dst));
        }
    }

    /// Copies `count` entries of `src` starting at `src_first` into this
    /// block starting at `dst_first`. Both blocks sit at the same level.
    pub fn copy_entries_from(&mut self, dst_first: usize, src: &NodeRef<'_>, src_first: usize, count: usize) {
        if count == 0 {
            return;
        }
        if src.level() == 0 {
            let from = self.geo.rec_offset(src_first);
            let to = self.geo.rec_offset(dst_first);
            self.data[to..to + count * REC_LEN]
                .copy_from_slice(&src.data[from..from + count * REC_LEN]);
        } else {
            let from = self.geo.key_offset(src_first);
            let to = self.geo.key_offset(dst_first);
            self.data[to..to + count * KEY_LEN]
                .copy_from_slice(&src.data[from..from + count * KEY_LEN]);
            let from = self.geo.ptr_offset(src_first);
            let to = self.geo.ptr_offset(dst_first);
            self.data[to..to + count * PTR_LEN]
                .copy_from_slice(&src.data[from..from + count * PTR_LEN]);
        }
    }
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes(data[off..off + 2].try_into().unwrap_or([0; 2]))
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(data[off..off + 4].try_into().unwrap_or([0; 4]))
}

fn write_u16(data: &mut [u8], off: usize, value: u16) {
    data[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

fn write_u32(data: &mut [u8], off: usize, value: u32) {
    data[off..off + 4].copy_from_slice(&value.to_be_bytes());
}
