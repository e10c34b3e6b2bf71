use bytes::Bytes;
use thiserror::Error;

use crate::types::ValueKind;

#[non_exhaustive]
#[derive(Clone, Debug, Error)]
pub enum CompactionFilterError {
    #[error("filter creation failed: {0}")]
    CreationFailed(String),

    #[error("filter failed: {0}")]
    FilterFailed(String),
}

/// Decision returned by a compaction filter for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionFilterDecision {
    /// Keep the record unchanged.
    Keep,
    /// Drop the record. Unless the compaction is at the bottommost level a
    /// deletion tombstone is emitted in its place so older versions on
    /// deeper levels stay shadowed.
    Remove,
    /// Replace the record's value.
    ChangeValue(Bytes),
    /// Drop this record and every following record with user key strictly
    /// less than the given key. No tombstones are written for the skipped
    /// range, so older versions of the skipped keys may become visible.
    RemoveAndSkipUntil(Bytes),
}

/// Context handed to the filter supplier for one compaction job.
#[derive(Debug, Clone)]
pub struct CompactionJobContext {
    pub job_id: u32,
    pub output_level: usize,
    pub bottommost_level: bool,
    pub is_manual_compaction: bool,
}

/// Filter invoked for `Put` and `BlobIndex` records whose sequence is above
/// every snapshot. One instance is created per sub-compaction and runs
/// single-threaded on its worker.
pub trait CompactionFilter: Send {
    fn name(&self) -> &'static str {
        "CompactionFilter"
    }

    /// Filters that cannot tolerate running with live snapshots must return
    /// false; the engine then fails the sub-compaction with `NotSupported`
    /// instead of silently breaking snapshot reads.
    fn ignore_snapshots(&self) -> bool {
        true
    }

    fn filter(
        &mut self,
        level: usize,
        user_key: &[u8],
        kind: ValueKind,
        value: &[u8],
    ) -> Result<CompactionFilterDecision, CompactionFilterError>;
}

/// Creates one filter instance per sub-compaction.
pub trait CompactionFilterSupplier: Send + Sync {
    fn create_compaction_filter(
        &self,
        context: &CompactionJobContext,
    ) -> Result<Box<dyn CompactionFilter>, CompactionFilterError>;
}
