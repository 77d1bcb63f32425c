use crate::{Error, Index, IndexValueVec, Result};
use ordered_float::NotNan;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A (label, score) pair ordered so that better entries compare greater: higher score first,
/// then lower label.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Entry {
    score: NotNan<f32>,
    label: Index,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.label.cmp(&self.label))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the best `k` (label, score) pairs offered to it.
///
/// Memory use is bounded by `k` regardless of how many pairs are offered.
#[derive(Clone, Debug)]
pub struct TopKAggregator {
    k: usize,
    // Min-heap on entry quality, so the worst kept entry is at the top
    heap: BinaryHeap<Reverse<Entry>>,
}

impl TopKAggregator {
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".to_owned()));
        }
        Ok(Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a pair; returns whether it was kept. NaN scores are never kept.
    pub fn offer(&mut self, label: Index, score: f32) -> bool {
        let score = match NotNan::new(score) {
            Ok(score) => score,
            Err(_) => return false,
        };
        let entry = Entry { score, label };
        if self.heap.len() < self.k {
            self.heap.push(Reverse(entry));
            return true;
        }
        match self.heap.peek() {
            Some(Reverse(worst)) if entry > *worst => {
                self.heap.pop();
                self.heap.push(Reverse(entry));
                true
            }
            _ => false,
        }
    }

    /// Take all kept pairs sorted by score descending, then label ascending, leaving the
    /// aggregator empty.
    pub fn drain(&mut self) -> IndexValueVec {
        // Ascending order of Reverse<Entry> is descending order of entry quality
        std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(entry)| (entry.label, entry.score.into_inner()))
            .collect()
    }
}
