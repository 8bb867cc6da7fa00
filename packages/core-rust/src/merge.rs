//! K-way merge of individually sorted sequences.
//!
//! Used to combine per-backend scan results into one globally ordered
//! result. Runs in `O(n log k)` for `n` total entries across `k` sequences
//! using a binary heap of read cursors.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::tuple::{compare_tuple, KeyValuePair};

/// Head of one input sequence, waiting in the heap.
struct Cursor<'a, T, F> {
    item: T,
    source: usize,
    compare: &'a F,
}

impl<T, F> PartialEq for Cursor<'_, T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, F> Eq for Cursor<'_, T, F> where F: Fn(&T, &T) -> Ordering {}

impl<T, F> PartialOrd for Cursor<'_, T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F> Ord for Cursor<'_, T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so the smallest item (and, on ties,
        // the lowest source index) is popped first.
        (self.compare)(&other.item, &self.item).then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sequences that are each sorted by `compare` into one sequence
/// sorted by `compare`.
///
/// Every input item appears exactly once in the output. Items that compare
/// equal are emitted in source-index order, and in input order within one
/// source. When `reverse` is set, each input must be sorted descending and
/// the output is descending.
pub fn merge_sorted<T, F>(sequences: Vec<Vec<T>>, reverse: bool, compare: F) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    let directed = |a: &T, b: &T| {
        let ord = compare(a, b);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    };

    let total = sequences.iter().map(Vec::len).sum();
    let mut output = Vec::with_capacity(total);
    let mut sources: Vec<std::vec::IntoIter<T>> =
        sequences.into_iter().map(IntoIterator::into_iter).collect();

    // A single source needs no comparison at all.
    if sources.len() == 1 {
        output.extend(sources.swap_remove(0));
        return output;
    }

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (source, iter) in sources.iter_mut().enumerate() {
        if let Some(item) = iter.next() {
            heap.push(Cursor {
                item,
                source,
                compare: &directed,
            });
        }
    }

    while let Some(Cursor { item, source, .. }) = heap.pop() {
        output.push(item);
        if let Some(next) = sources[source].next() {
            heap.push(Cursor {
                item: next,
                source,
                compare: &directed,
            });
        }
    }

    output
}

/// Merges per-backend scan results by key under [`compare_tuple`].
pub fn merge_entries<V>(sequences: Vec<Vec<KeyValuePair<V>>>, reverse: bool) -> Vec<KeyValuePair<V>> {
    merge_sorted(sequences, reverse, |a, b| compare_tuple(&a.key, &b.key))
}
