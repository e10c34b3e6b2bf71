use std::collections::VecDeque;

use crate::error::StrataError;
use crate::iter::InternalIterator;
use crate::types::RowEntry;

/// Scripted input source for iterator tests; yields the queued entries in
/// order and surfaces queued errors as terminal.
pub(crate) struct TestIterator {
    entries: VecDeque<Result<RowEntry, StrataError>>,
}

impl TestIterator {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn with_entry(mut self, entry: RowEntry) -> Self {
        self.entries.push_back(Ok(entry));
        self
    }

    #[allow(dead_code)]
    pub(crate) fn with_error(mut self, error: StrataError) -> Self {
        self.entries.push_back(Err(error));
        self
    }
}

impl InternalIterator for TestIterator {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        self.entries.pop_front().map_or(Ok(None), |e| e.map(Some))
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        while let Some(Ok(entry)) = self.entries.front() {
            if entry.key.user_key.as_ref() < next_key {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) fn assert_iterator<T: InternalIterator>(iterator: &mut T, expected: &[RowEntry]) {
    for expected_entry in expected {
        let entry = iterator
            .next_entry()
            .unwrap()
            .expect("expected next_entry to return a value");
        assert_eq!(&entry, expected_entry);
    }
    assert!(iterator.next_entry().unwrap().is_none());
}
