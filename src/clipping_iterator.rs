use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::comparator::UserComparator;
use crate::error::StrataError;
use crate::iter::InternalIterator;
use crate::types::RowEntry;

/// Restricts an input stream to the user-key range `[lower, upper)`. The
/// bounds are re-checked on every step, independently of any bound hints the
/// underlying cursors were built with.
pub struct ClippingIterator<T: InternalIterator> {
    inner: T,
    cmp: Arc<dyn UserComparator>,
    lower: Option<Bytes>,
    upper: Option<Bytes>,
    positioned: bool,
    exhausted: bool,
}

impl<T: InternalIterator> ClippingIterator<T> {
    pub fn new(
        inner: T,
        cmp: Arc<dyn UserComparator>,
        lower: Option<Bytes>,
        upper: Option<Bytes>,
    ) -> Self {
        Self {
            inner,
            cmp,
            lower,
            upper,
            positioned: false,
            exhausted: false,
        }
    }
}

impl<T: InternalIterator> InternalIterator for ClippingIterator<T> {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        if !self.positioned {
            if let Some(lower) = self.lower.clone() {
                self.inner.seek(&lower)?;
            }
            self.positioned = true;
        }
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.next_entry()? {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(entry) => {
                if let Some(upper) = &self.upper {
                    if self.cmp.compare(&entry.key.user_key, upper) != Ordering::Less {
                        self.exhausted = true;
                        return Ok(None);
                    }
                }
                Ok(Some(entry))
            }
        }
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        let target = match &self.lower {
            Some(lower) if self.cmp.compare(next_key, lower) == Ordering::Less => lower.clone(),
            _ => Bytes::copy_from_slice(next_key),
        };
        self.inner.seek(&target)?;
        self.positioned = true;
        Ok(())
    }
}
