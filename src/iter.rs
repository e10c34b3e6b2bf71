use crate::error::StrataError;
use crate::types::RowEntry;

/// Capability set shared by every input source the engine merges: level
/// cursors, L0 file cursors, and the wrapper stack built on top of them.
/// `next_entry` yields entries in internal-key order; an error is terminal
/// and no further entries may be emitted after one is returned.
pub trait InternalIterator: Send {
    /// Returns the next entry, or `None` once the source is exhausted.
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError>;

    /// Positions the iterator so the next entry returned is the first one
    /// with user key >= `next_key`.
    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError>;
}

impl<'a> InternalIterator for Box<dyn InternalIterator + 'a> {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        self.as_mut().next_entry()
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        self.as_mut().seek(next_key)
    }
}
