use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of inode btree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InobtStatsSnapshot {
    /// Lookups issued through cursors
    pub lookups: u64,
    /// Records inserted
    pub inserts: u64,
    /// Records deleted
    pub deletes: u64,
    /// Records updated in place
    pub updates: u64,
    /// Leaf blocks split
    pub leaf_splits: u64,
    /// Interior blocks split
    pub internal_splits: u64,
    /// Roots added on top of the tree
    pub new_roots: u64,
    /// Entries moved into a left sibling
    pub left_shifts: u64,
    /// Entries moved into a right sibling
    pub right_shifts: u64,
    /// Leaf blocks merged away
    pub leaf_joins: u64,
    /// Interior blocks merged away
    pub internal_joins: u64,
    /// Single-child roots removed
    pub root_collapses: u64,
}

/// Thread-safe counters for inode btree operations.
#[derive(Default, Debug)]
pub struct InobtStats {
    lookups: AtomicU64,
    inserts: AtomicU64,
    deletes: AtomicU64,
    updates: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    new_roots: AtomicU64,
    left_shifts: AtomicU64,
    right_shifts: AtomicU64,
    leaf_joins: AtomicU64,
    internal_joins: AtomicU64,
    root_collapses: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, AtomicOrdering::Relaxed);
}

impl InobtStats {
    pub(crate) fn inc_lookups(&self) {
        bump(&self.lookups);
    }

    pub(crate) fn inc_inserts(&self) {
        bump(&self.inserts);
    }

    pub(crate) fn inc_deletes(&self) {
        bump(&self.deletes);
    }

    pub(crate) fn inc_updates(&self) {
        bump(&self.updates);
    }

    pub(crate) fn inc_splits(&self, level: usize) {
        if level == 0 {
            bump(&self.leaf_splits);
        } else {
            bump(&self.internal_splits);
        }
    }

    pub(crate) fn inc_new_roots(&self) {
        bump(&self.new_roots);
    }

    pub(crate) fn inc_left_shifts(&self) {
        bump(&self.left_shifts);
    }

    pub(crate) fn inc_right_shifts(&self) {
        bump(&self.right_shifts);
    }

    pub(crate) fn inc_joins(&self, level: usize) {
        if level == 0 {
            bump(&self.leaf_joins);
        } else {
            bump(&self.internal_joins);
        }
    }

    pub(crate) fn inc_root_collapses(&self) {
        bump(&self.root_collapses);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> InobtStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(AtomicOrdering::Relaxed);
        InobtStatsSnapshot {
            lookups: load(&self.lookups),
            inserts: load(&self.inserts),
            deletes: load(&self.deletes),
            updates: load(&self.updates),
            leaf_splits: load(&self.leaf_splits),
            internal_splits: load(&self.internal_splits),
            new_roots: load(&self.new_roots),
            left_shifts: load(&self.left_shifts),
            right_shifts: load(&self.right_shifts),
            leaf_joins: load(&self.leaf_joins),
            internal_joins: load(&self.internal_joins),
            root_collapses: load(&self.root_collapses),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self, agno: u32) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "inobt::stats",
            agno,
            lookups = snapshot.lookups,
            inserts = snapshot.inserts,
            deletes = snapshot.deletes,
            updates = snapshot.updates,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            new_roots = snapshot.new_roots,
            left_shifts = snapshot.left_shifts,
            right_shifts = snapshot.right_shifts,
            leaf_joins = snapshot.leaf_joins,
            internal_joins = snapshot.internal_joins,
            root_collapses = snapshot.root_collapses,
            "inobt stats snapshot"
        );
    }
}
