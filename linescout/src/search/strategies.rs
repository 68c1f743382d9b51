use rayon::prelude::*;

use super::SearchStrategy;
use crate::dataset::DatasetSnapshot;

/// O(1) amortized membership test against the snapshot's precomputed set.
/// The default production strategy.
#[derive(Debug, Clone, Copy)]
pub struct SetLookup;

impl SearchStrategy for SetLookup {
    fn name(&self) -> &'static str {
        "set"
    }

    fn matches(&self, snapshot: &DatasetSnapshot, query: &str) -> bool {
        snapshot.contains(query)
    }
}

/// O(n) sequential equality scan over the ordered lines. The baseline the
/// other strategies are benchmarked against.
#[derive(Debug, Clone, Copy)]
pub struct LinearScan;

impl SearchStrategy for LinearScan {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn matches(&self, snapshot: &DatasetSnapshot, query: &str) -> bool {
        snapshot.lines().iter().any(|line| line == query)
    }
}

/// Binary search over the snapshot's memoized sorted index permutation.
/// The sort is paid once per snapshot, on first use.
#[derive(Debug, Clone, Copy)]
pub struct BinarySearch;

impl SearchStrategy for BinarySearch {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn matches(&self, snapshot: &DatasetSnapshot, query: &str) -> bool {
        let lines = snapshot.lines();
        snapshot
            .sorted_order()
            .binary_search_by(|&i| lines[i].as_str().cmp(query))
            .is_ok()
    }
}

/// Data-parallel equality scan over the ordered lines using rayon's
/// work-stealing pool. Only pays off on large snapshots.
#[derive(Debug, Clone, Copy)]
pub struct ParallelScan;

impl SearchStrategy for ParallelScan {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn matches(&self, snapshot: &DatasetSnapshot, query: &str) -> bool {
        snapshot.lines().par_iter().any(|line| line == query)
    }
}
