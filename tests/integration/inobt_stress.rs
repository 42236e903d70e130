#![allow(missing_docs)]

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use inobt::storage::inobt::{InobtOptions, InobtRec, InodeBtree, INODES_PER_CHUNK};
use inobt::types::{AgIno, AgNumber, BlockRef, Result};
use inobt::MemAllocGroup;

const GROUPS: u32 = 4;
const OPS_PER_GROUP: usize = 3_000;
const CHUNK_SPACE: u32 = 512;
const SEED: u64 = 0x1a0d_e5ed;

fn options() -> InobtOptions {
    InobtOptions {
        block_size: 1024,
        leaf_max_recs: Some(6),
        node_max_recs: Some(5),
        ..InobtOptions::default()
    }
}

/// Runs a random insert/delete/update workload on one allocation group,
/// committing in batches and checking the tree against a model.
fn run_group(agno: u32) -> Result<u64> {
    let opts = options();
    let ag = MemAllocGroup::new(AgNumber(agno), opts.block_size as usize, 8192, 16)?;
    let tree = InodeBtree::new(AgNumber(agno), opts)?;
    tree.init_empty(&ag, BlockRef(16))?;
    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ u64::from(agno));
    let mut model: BTreeMap<u32, InobtRec> = BTreeMap::new();

    for step in 0..OPS_PER_GROUP {
        let start = rng.gen_range(0..CHUNK_SPACE) * INODES_PER_CHUNK;
        let mut cur = tree.cursor(&ag)?;
        let found = cur.lookup_eq(AgIno(start))?;
        assert_eq!(found, model.contains_key(&start));
        match rng.gen_range(0..10) {
            0..=4 if !found => {
                let rec = InobtRec::new_chunk(AgIno(start));
                assert!(cur.insert(&rec)?);
                model.insert(start, rec);
            }
            5..=7 if found => {
                assert!(cur.delete()?);
                model.remove(&start);
            }
            _ if found => {
                let mut rec = cur.get_record()?.expect("record");
                rec.take_inode(rng.gen_range(0..INODES_PER_CHUNK));
                cur.update(&rec)?;
                model.insert(start, rec);
            }
            _ => {}
        }
        drop(cur);
        if step % 100 == 99 {
            ag.commit()?;
            tree.verify(&ag)?;
        }
    }
    ag.commit()?;

    let mut seen = Vec::new();
    tree.for_each_record(&ag, |rec| {
        seen.push(*rec);
        Ok(())
    })?;
    let expected: Vec<InobtRec> = model.values().copied().collect();
    assert_eq!(seen, expected);
    assert_eq!(ag.outstanding_holds(), 0);
    Ok(tree.verify(&ag)?.records)
}

#[test]
fn independent_groups_run_concurrently() -> Result<()> {
    let results: Vec<Result<u64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..GROUPS)
            .map(|agno| scope.spawn(move || run_group(agno)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("group thread panicked"))
            .collect()
    });
    for result in results {
        assert!(result? > 0);
    }
    Ok(())
}
