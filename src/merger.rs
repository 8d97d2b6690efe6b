//! Run mergers.
//!
//! Both mergers consume a [`RunSet`] and yield its records in ascending order. A run is retired (its backing
//! file deleted) as soon as it is exhausted; runs still alive when a merger is dropped are released with it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::chunk::RunSet;
use crate::record::Record;
use crate::sort::SortError;

/// Merge strategy used to select the run holding the smallest head.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Linear scan over all live runs, *O(n)* per record where *n* is the number of runs.
    LinearScan,
    /// Binary heap keyed by head values, *O(log n)* per record.
    BinaryHeap,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::LinearScan
    }
}

/// Linear scan merger.
/// Every step scans the heads of all live runs and takes the smallest one.
pub struct LinearScanMerger<R> {
    runs: RunSet<R>,
}

impl<R: Record> LinearScanMerger<R> {
    /// Creates a merger draining `runs`.
    /// Run records should be sorted in ascending order otherwise the result is undefined.
    pub fn new(mut runs: RunSet<R>) -> Self {
        retire_exhausted(&mut runs);

        return LinearScanMerger { runs };
    }

    /// Returns the number of live runs.
    pub fn live_runs(&self) -> usize {
        self.runs.len()
    }

    /// Returns the number of retired runs whose backing file could not be deleted.
    pub fn cleanup_failures(&self) -> usize {
        self.runs.cleanup_failures()
    }
}

impl<R: Record> Iterator for LinearScanMerger<R> {
    type Item = Result<R, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (slot, head) = self
            .runs
            .iter()
            .filter_map(|(slot, run)| run.head().map(|head| (slot, head)))
            .min_by_key(|&(_, head)| head)?;

        if let Err(err) = advance_or_retire(&mut self.runs, slot) {
            return Some(Err(err));
        }

        return Some(Ok(head));
    }
}

/// Binary heap merger.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of runs.
pub struct BinaryHeapMerger<R> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<(Reverse<R>, usize)>,
    runs: RunSet<R>,
}

impl<R: Record> BinaryHeapMerger<R> {
    /// Creates a merger draining `runs`.
    /// Run records should be sorted in ascending order otherwise the result is undefined.
    pub fn new(mut runs: RunSet<R>) -> Self {
        retire_exhausted(&mut runs);

        let mut items = BinaryHeap::with_capacity(runs.len());
        for (slot, run) in runs.iter() {
            if let Some(head) = run.head() {
                items.push((Reverse(head), slot));
            }
        }

        return BinaryHeapMerger { items, runs };
    }

    /// Returns the number of live runs.
    pub fn live_runs(&self) -> usize {
        self.runs.len()
    }

    /// Returns the number of retired runs whose backing file could not be deleted.
    pub fn cleanup_failures(&self) -> usize {
        self.runs.cleanup_failures()
    }
}

impl<R: Record> Iterator for BinaryHeapMerger<R> {
    type Item = Result<R, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (Reverse(head), slot) = self.items.pop()?;

        match advance_or_retire(&mut self.runs, slot) {
            Ok(Some(next)) => self.items.push((Reverse(next), slot)),
            Ok(None) => {}
            Err(err) => return Some(Err(err)),
        }

        return Some(Ok(head));
    }
}

fn retire_exhausted<R: Record>(runs: &mut RunSet<R>) {
    let exhausted = Vec::from_iter(runs.iter().filter(|(_, run)| run.is_exhausted()).map(|(slot, _)| slot));
    for slot in exhausted {
        runs.retire(slot);
    }
}

/// Moves the run at `slot` to its next record, retiring it once exhausted or broken.
fn advance_or_retire<R: Record>(runs: &mut RunSet<R>, slot: usize) -> Result<Option<R>, SortError> {
    let advanced = match runs.get_mut(slot) {
        Some(run) => run.advance(),
        None => return Ok(None),
    };

    match advanced {
        Ok(Some(head)) => Ok(Some(head)),
        Ok(None) => {
            runs.retire(slot);
            Ok(None)
        }
        Err(err) => {
            runs.retire(slot);
            Err(err)
        }
    }
}
