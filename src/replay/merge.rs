//! Priority-queue k-way merge over already-ordered sequences.
//!
//! Ties on the key are broken by insertion order (a monotonically increasing
//! sequence number assigned as items enter the heap), which makes the merged
//! output stable and reproducible across runs for the same inputs.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Entry<K: Ord, T> {
    key: K,
    seq: u64,
    source: usize,
    item: T,
}

impl<K: Ord, T> PartialEq for Entry<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, T> Eq for Entry<K, T> {}

impl<K: Ord, T> PartialOrd for Entry<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for Entry<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Merge any number of ordered iterators into one ordered iterator.
///
/// Each source must already yield items in non-decreasing key order; the
/// merge then guarantees globally non-decreasing keys.
pub struct OrderedMerge<I, K, F>
where
    I: Iterator,
    K: Ord,
    F: Fn(&I::Item) -> K,
{
    sources: Vec<I>,
    key_of: F,
    heap: BinaryHeap<Reverse<Entry<K, I::Item>>>,
    next_seq: u64,
}

impl<I, K, F> OrderedMerge<I, K, F>
where
    I: Iterator,
    K: Ord,
    F: Fn(&I::Item) -> K,
{
    pub fn new(sources: Vec<I>, key_of: F) -> Self {
        let mut merge = Self {
            sources,
            key_of,
            heap: BinaryHeap::new(),
            next_seq: 0,
        };
        for source in 0..merge.sources.len() {
            merge.pull(source);
        }
        merge
    }

    fn pull(&mut self, source: usize) {
        if let Some(item) = self.sources[source].next() {
            let key = (self.key_of)(&item);
            let seq = self.next_seq;
            self.next_seq += 1;
            self.heap.push(Reverse(Entry { key, seq, source, item }));
        }
    }
}

impl<I, K, F> Iterator for OrderedMerge<I, K, F>
where
    I: Iterator,
    K: Ord,
    F: Fn(&I::Item) -> K,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let Reverse(entry) = self.heap.pop()?;
        self.pull(entry.source);
        Some(entry.item)
    }
}
