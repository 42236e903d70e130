#![allow(missing_docs)]

use inobt::primitives::AgHeader;
use inobt::storage::inobt::{InobtOptions, InobtRec, InodeBtree, LookupMode, INODES_PER_CHUNK};
use inobt::types::{AgIno, AgNumber, BlockRef, InobtError, Result};
use inobt::MemAllocGroup;

fn setup(max_recs: u16) -> Result<(MemAllocGroup, InodeBtree)> {
    let options = InobtOptions::from_toml_str(&format!(
        "block_size = 512\nleaf_max_recs = {max_recs}\nnode_max_recs = {max_recs}\n"
    ))?;
    let ag = MemAllocGroup::new(AgNumber(3), 512, 2048, 8)?;
    let tree = InodeBtree::new(AgNumber(3), options)?;
    tree.init_empty(&ag, BlockRef(0))?;
    ag.commit()?;
    Ok((ag, tree))
}

fn insert(ag: &MemAllocGroup, tree: &InodeBtree, start: u32) -> Result<()> {
    let mut cur = tree.cursor(ag)?;
    assert!(!cur.lookup(AgIno(start), LookupMode::Eq)?);
    assert!(cur.insert(&InobtRec::new_chunk(AgIno(start)))?);
    Ok(())
}

/// Allocates the lowest free inode at or after `near`, as inode allocation
/// does when it walks the btree for a chunk with free inodes.
fn allocate_inode(ag: &MemAllocGroup, tree: &InodeBtree, near: AgIno) -> Result<Option<AgIno>> {
    let mut cur = tree.cursor(ag)?;
    if !cur.lookup_ge(near)? {
        return Ok(None);
    }
    loop {
        let Some(mut rec) = cur.get_record()? else {
            return Ok(None);
        };
        if let Some(offset) = rec.free_mask.first_free() {
            assert!(rec.take_inode(offset));
            cur.update(&rec)?;
            return Ok(rec.start_ino.checked_add(offset));
        }
        if !cur.increment(0)? {
            return Ok(None);
        }
    }
}

/// Frees `ino`, dropping its chunk's record once every inode is free again.
fn free_inode(ag: &MemAllocGroup, tree: &InodeBtree, ino: AgIno) -> Result<()> {
    let mut cur = tree.cursor(ag)?;
    assert!(cur.lookup_le(ino)?);
    let mut rec = cur.get_record()?.expect("chunk record");
    assert!(rec.contains(ino));
    assert!(rec.release_inode(ino.0 - rec.start_ino.0));
    if rec.free_count == INODES_PER_CHUNK as i32 {
        assert!(cur.delete()?);
    } else {
        cur.update(&rec)?;
    }
    Ok(())
}

#[test]
fn split_produces_expected_shape() -> Result<()> {
    let (ag, tree) = setup(4)?;
    for key in [100, 200, 50, 150, 300] {
        insert(&ag, &tree, key)?;
    }
    ag.commit()?;
    let report = tree.verify(&ag)?;
    assert_eq!(report.height, 2);
    assert_eq!(report.blocks_per_level, vec![2, 1]);
    assert_eq!(report.records, 5);

    let mut keys = Vec::new();
    tree.for_each_record(&ag, |rec| {
        keys.push(rec.start_ino.0);
        Ok(())
    })?;
    assert_eq!(keys, vec![50, 100, 150, 200, 300]);
    Ok(())
}

#[test]
fn lookups_between_and_beyond_keys() -> Result<()> {
    let (ag, tree) = setup(4)?;
    for key in [100, 200, 50, 150, 300] {
        insert(&ag, &tree, key)?;
    }
    let mut cur = tree.cursor(&ag)?;
    assert!(cur.lookup_ge(AgIno(120))?);
    assert_eq!(cur.get_record()?.map(|r| r.start_ino), Some(AgIno(150)));
    assert!(!cur.lookup_le(AgIno(10))?);
    assert_eq!(cur.get_record()?, None);
    assert!(cur.lookup_eq(AgIno(300))?);
    assert!(!cur.increment(0)?);
    assert!(!cur.increment(0)?);
    assert_eq!(cur.get_record()?, None);
    Ok(())
}

#[test]
fn inode_allocation_cycle_shrinks_tree_back() -> Result<()> {
    let (ag, tree) = setup(4)?;
    let chunks: Vec<u32> = (0..24).map(|i| i * INODES_PER_CHUNK).collect();
    for &start in &chunks {
        insert(&ag, &tree, start)?;
    }
    ag.commit()?;
    let free_before = ag.free_blocks();

    let mut allocated = Vec::new();
    while let Some(ino) = allocate_inode(&ag, &tree, AgIno(0))? {
        allocated.push(ino);
    }
    assert_eq!(allocated.len(), chunks.len() * INODES_PER_CHUNK as usize);
    assert!(allocated.windows(2).all(|w| w[0] < w[1]));
    let full = tree.verify(&ag)?;
    assert_eq!(full.free_inodes, 0);
    assert_eq!(ag.free_blocks(), free_before);
    ag.commit()?;

    for ino in allocated.iter().rev() {
        free_inode(&ag, &tree, *ino)?;
    }
    ag.commit()?;
    let report = tree.verify(&ag)?;
    assert_eq!(report.records, 0);
    assert_eq!(report.height, 1);
    assert_eq!(ag.root()?.1, 1);
    assert_eq!(ag.outstanding_holds(), 0);
    Ok(())
}

#[test]
fn failed_transaction_is_rolled_back() -> Result<()> {
    let (ag, tree) = setup(4)?;
    for i in 0..4 {
        insert(&ag, &tree, i * INODES_PER_CHUNK)?;
    }
    ag.commit()?;
    let before = tree.verify(&ag)?;

    ag.set_alloc_limit(Some(0));
    let mut cur = tree.cursor(&ag)?;
    assert!(!cur.lookup_eq(AgIno(4 * INODES_PER_CHUNK))?);
    let err = cur
        .insert(&InobtRec::new_chunk(AgIno(4 * INODES_PER_CHUNK)))
        .unwrap_err();
    assert!(matches!(err, InobtError::NoSpace));
    drop(cur);
    ag.abort();
    ag.set_alloc_limit(None);

    assert_eq!(tree.verify(&ag)?, before);
    Ok(())
}

#[test]
fn options_reject_tiny_fan_out() {
    assert!(matches!(setup(3), Err(InobtError::Invalid(_))));
}
