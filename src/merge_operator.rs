use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

#[non_exhaustive]
#[derive(Clone, Debug, Error)]
pub enum MergeOperatorError {
    #[error("merge failed: {0}")]
    MergeFailed(String),
}

/// Folds merge operands during compaction.
///
/// The operation MUST be associative: `merge(merge(a, b), c)` must equal
/// `merge(a, merge(b, c))`, because the engine may fold a run of operands
/// without the base value when the base lives on a level not participating in
/// the compaction.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &'static str {
        "MergeOperator"
    }

    /// Combines `existing` (the accumulated value, absent when the operand
    /// run is not anchored by a base value) with one operand, oldest first.
    fn merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operand: &[u8],
    ) -> Result<Bytes, MergeOperatorError>;
}

pub type MergeOperatorType = Arc<dyn MergeOperator>;
