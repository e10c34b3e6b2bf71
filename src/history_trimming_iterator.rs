use std::sync::Arc;

use bytes::Bytes;

use crate::comparator::UserComparator;
use crate::error::StrataError;
use crate::iter::InternalIterator;
use crate::types::RowEntry;

/// Drops entries whose user-key timestamp is strictly less than the
/// descriptor's trim bound. Only constructed when the comparator carries a
/// timestamp suffix.
pub struct HistoryTrimmingIterator<T: InternalIterator> {
    inner: T,
    cmp: Arc<dyn UserComparator>,
    trim_ts: Bytes,
}

impl<T: InternalIterator> HistoryTrimmingIterator<T> {
    pub fn new(inner: T, cmp: Arc<dyn UserComparator>, trim_ts: Bytes) -> Self {
        debug_assert!(cmp.timestamp_size() > 0);
        Self {
            inner,
            cmp,
            trim_ts,
        }
    }
}

impl<T: InternalIterator> InternalIterator for HistoryTrimmingIterator<T> {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        while let Some(entry) = self.inner.next_entry()? {
            let ts = self.cmp.timestamp_of(&entry.key.user_key);
            if ts < self.trim_ts.as_ref() {
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        self.inner.seek(next_key)
    }
}
