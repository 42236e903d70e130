//! Micro benchmarks for the inode allocation btree.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use inobt::storage::inobt::{InobtOptions, InobtRec, InodeBtree};
use inobt::{AgIno, AgNumber, BlockRef, MemAllocGroup};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const CHUNK_COUNT: u32 = 16_384;
const LOOKUP_SAMPLES: usize = 4_096;
const SCAN_WIDTH: u32 = 512;
const AG_BLOCKS: u32 = 1 << 16;

fn micro_inobt(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/inobt");
    group.sample_size(30);

    group.throughput(Throughput::Elements(u64::from(CHUNK_COUNT)));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_sequence(0, CHUNK_COUNT);
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_chunks: Vec<u32> = (0..CHUNK_COUNT).collect();
    random_chunks.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(u64::from(CHUNK_COUNT)));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |tree| {
                tree.insert_chunks(&random_chunks);
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(u64::from(CHUNK_COUNT)));
    group.bench_function("delete_random", |b| {
        b.iter_batched(
            || {
                let tree = FreshTree::new();
                tree.insert_sequence(0, CHUNK_COUNT);
                tree
            },
            |tree| {
                tree.delete_chunks(&random_chunks);
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    let mut loaded = LoadedTree::new(CHUNK_COUNT);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| loaded.point_lookup(LOOKUP_SAMPLES));
    });

    group.throughput(Throughput::Elements(u64::from(SCAN_WIDTH)));
    group.bench_function(BenchmarkId::new("free_inode_scan", SCAN_WIDTH), |b| {
        b.iter(|| loaded.free_inode_scan(SCAN_WIDTH));
    });

    group.finish();
}

struct FreshTree {
    ag: MemAllocGroup,
    tree: InodeBtree,
}

impl FreshTree {
    fn new() -> Self {
        let options = InobtOptions::default();
        let ag = MemAllocGroup::new(AgNumber(0), options.block_size as usize, AG_BLOCKS, 8)
            .expect("allocation group");
        let tree = InodeBtree::new(AgNumber(0), options).expect("tree");
        tree.init_empty(&ag, BlockRef(0)).expect("init");
        Self { ag, tree }
    }

    fn height(&self) -> u16 {
        self.tree.height(&self.ag).expect("height")
    }

    fn insert_sequence(&self, start: u32, count: u32) {
        let chunks: Vec<u32> = (start..start + count).collect();
        self.insert_chunks(&chunks);
    }

    fn insert_chunks(&self, chunks: &[u32]) {
        let mut cur = self.tree.cursor(&self.ag).expect("cursor");
        for chunk in chunks {
            let start = AgIno(chunk * 64);
            if !cur.lookup_eq(start).expect("lookup") {
                cur.insert(&InobtRec::new_chunk(start)).expect("insert");
            }
        }
        drop(cur);
        self.ag.commit().expect("commit");
    }

    fn delete_chunks(&self, chunks: &[u32]) {
        let mut cur = self.tree.cursor(&self.ag).expect("cursor");
        for chunk in chunks {
            if cur.lookup_eq(AgIno(chunk * 64)).expect("lookup") {
                cur.delete().expect("delete");
            }
        }
        drop(cur);
        self.ag.commit().expect("commit");
    }
}

struct LoadedTree {
    fresh: FreshTree,
    max_chunk: u32,
    rng: ChaCha8Rng,
}

impl LoadedTree {
    fn new(count: u32) -> Self {
        let fresh = FreshTree::new();
        fresh.insert_sequence(0, count);
        Self {
            fresh,
            max_chunk: count,
            rng: ChaCha8Rng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        let mut cur = self.fresh.tree.cursor(&self.fresh.ag).expect("cursor");
        for _ in 0..samples {
            let chunk = self.rng.gen_range(0..self.max_chunk);
            black_box(cur.lookup_eq(AgIno(chunk * 64)).expect("lookup"));
            black_box(cur.get_record().expect("record"));
        }
    }

    /// Walks forward from a random chunk the way inode allocation hunts for
    /// a chunk with free inodes.
    fn free_inode_scan(&mut self, width: u32) {
        let mut cur = self.fresh.tree.cursor(&self.fresh.ag).expect("cursor");
        for _ in 0..16 {
            let start = self.rng.gen_range(0..(self.max_chunk - width));
            cur.lookup_ge(AgIno(start * 64)).expect("lookup");
            for _ in 0..width {
                if let Some(rec) = cur.get_record().expect("record") {
                    black_box(rec.first_free());
                }
                if !cur.increment(0).expect("increment") {
                    break;
                }
            }
        }
    }
}

criterion_group!(benches, micro_inobt);
criterion_main!(benches);
