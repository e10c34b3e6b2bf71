use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::comparator::InternalKeyComparator;
use crate::error::StrataError;
use crate::iter::InternalIterator;
use crate::types::RowEntry;

struct MergeIteratorHeapEntry<T: InternalIterator> {
    next_kv: RowEntry,
    index: u32,
    iterator: T,
    icmp: InternalKeyComparator,
}

impl<T: InternalIterator> MergeIteratorHeapEntry<T> {
    /// Seek the iterator and return a refilled heap entry, or `None` when the
    /// iterator has no entries at or past `next_key`.
    fn seek(mut self, next_key: &[u8]) -> Result<Option<MergeIteratorHeapEntry<T>>, StrataError> {
        if self
            .icmp
            .user()
            .compare(&self.next_kv.key.user_key, next_key)
            != Ordering::Less
        {
            return Ok(Some(self));
        }
        self.iterator.seek(next_key)?;
        if let Some(next_kv) = self.iterator.next_entry()? {
            Ok(Some(MergeIteratorHeapEntry {
                next_kv,
                index: self.index,
                iterator: self.iterator,
                icmp: self.icmp,
            }))
        } else {
            Ok(None)
        }
    }
}

impl<T: InternalIterator> Eq for MergeIteratorHeapEntry<T> {}

impl<T: InternalIterator> PartialEq<Self> for MergeIteratorHeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.next_kv == other.next_kv
    }
}

impl<T: InternalIterator> PartialOrd<Self> for MergeIteratorHeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: InternalIterator> Ord for MergeIteratorHeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.icmp
            .compare(&self.next_kv.key, &other.next_kv.key)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Merges input cursors into one stream sorted by the composite internal-key
/// order. Every entry of every input is emitted; visibility rules are applied
/// downstream by the compaction iterator, never here.
pub struct MergeIterator<T: InternalIterator> {
    current: Option<MergeIteratorHeapEntry<T>>,
    iterators: BinaryHeap<Reverse<MergeIteratorHeapEntry<T>>>,
}

impl<T: InternalIterator> MergeIterator<T> {
    pub fn new(
        icmp: InternalKeyComparator,
        iterators: impl IntoIterator<Item = T>,
    ) -> Result<Self, StrataError> {
        let mut heap = BinaryHeap::new();
        for (index, mut iterator) in iterators.into_iter().enumerate() {
            if let Some(kv) = iterator.next_entry()? {
                heap.push(Reverse(MergeIteratorHeapEntry {
                    next_kv: kv,
                    index: index as u32,
                    iterator,
                    icmp: icmp.clone(),
                }));
            }
        }
        Ok(Self {
            current: heap.pop().map(|r| r.0),
            iterators: heap,
        })
    }

    fn advance(&mut self) -> Result<Option<RowEntry>, StrataError> {
        if let Some(mut iterator_state) = self.current.take() {
            let current_kv = iterator_state.next_kv.clone();
            if let Some(kv) = iterator_state.iterator.next_entry()? {
                iterator_state.next_kv = kv;
                self.iterators.push(Reverse(iterator_state));
            }
            self.current = self.iterators.pop().map(|r| r.0);
            return Ok(Some(current_kv));
        }
        Ok(None)
    }
}

impl<T: InternalIterator> InternalIterator for MergeIterator<T> {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        self.advance()
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        let mut seeked = Vec::with_capacity(self.iterators.len() + 1);
        if let Some(iterator) = self.current.take() {
            seeked.push(iterator.seek(next_key)?);
        }
        for iterator in std::mem::take(&mut self.iterators) {
            seeked.push(iterator.0.seek(next_key)?);
        }
        for entry in seeked.into_iter().flatten() {
            self.iterators.push(Reverse(entry));
        }
        self.current = self.iterators.pop().map(|r| r.0);
        Ok(())
    }
}
