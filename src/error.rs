use std::sync::Arc;

use thiserror::Error;

use crate::compaction_filter::CompactionFilterError;
use crate::merge_operator::MergeOperatorError;

#[non_exhaustive]
#[derive(Clone, Debug, Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    IoError(#[from] Arc<std::io::Error>),

    #[error("Corruption: {msg}")]
    Corruption { msg: String },

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Not supported: {msg}")]
    NotSupported { msg: String },

    #[error("Column family dropped during compaction")]
    ColumnFamilyDropped,

    #[error("Database shutdown in progress")]
    ShutdownInProgress,

    #[error("Manual compaction paused")]
    ManualCompactionPaused,

    #[error("Max allowed space reached: {msg}")]
    SpaceLimit { msg: String },

    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    #[error("Merge operator error: {0}")]
    MergeOperatorError(#[from] MergeOperatorError),

    #[error("Compaction filter error: {0}")]
    CompactionFilterError(#[from] CompactionFilterError),
}

impl StrataError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StrataError::Corruption { msg: msg.into() }
    }

    pub(crate) fn not_supported(msg: impl Into<String>) -> Self {
        StrataError::NotSupported { msg: msg.into() }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        StrataError::InvalidArgument { msg: msg.into() }
    }

    /// True for errors that must be reported to the background error handler
    /// as I/O failures (file create/write/sync/close/delete).
    pub fn is_io_error(&self) -> bool {
        matches!(self, StrataError::IoError(_) | StrataError::SpaceLimit { .. })
    }

    pub fn is_manual_compaction_paused(&self) -> bool {
        matches!(self, StrataError::ManualCompactionPaused)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        matches!(self, StrataError::ShutdownInProgress)
    }

    pub fn is_column_family_dropped(&self) -> bool {
        matches!(self, StrataError::ColumnFamilyDropped)
    }
}

impl From<std::io::Error> for StrataError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}
