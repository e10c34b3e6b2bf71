use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::blob::{BlobFileMetadata, BlobGarbageMeter};
use crate::error::StrataError;
use crate::file_metadata::FileMetadata;
use crate::output_validator::ValidatorDigest;
use crate::stats::{CompactionIterationStats, CompactionJobStats};

/// One finished output file: its metadata plus the validator digest captured
/// while it was built, kept for the verifier.
#[derive(Debug, Clone)]
pub struct FinishedOutput {
    pub meta: FileMetadata,
    pub validator: ValidatorDigest,
}

/// State of one `[start, end)` slice. Created in `Prepare`, mutated only by
/// its owning worker during `Run`, aggregated by the job afterwards.
pub struct SubcompactionState {
    pub sub_job_id: u32,
    pub start: Option<Bytes>,
    pub end: Option<Bytes>,

    /// First error hit by this worker; `None` is OK.
    pub status: Option<StrataError>,
    /// First I/O error, tracked separately so I/O failures can drive the
    /// background error handler while logical failures do not.
    pub io_status: Option<StrataError>,

    pub outputs: Vec<FinishedOutput>,
    pub blob_additions: Vec<BlobFileMetadata>,
    pub blob_garbage: Option<Arc<Mutex<BlobGarbageMeter>>>,

    pub iter_stats: CompactionIterationStats,
    pub job_stats: CompactionJobStats,

    pub notify_on_completion: bool,
}

impl SubcompactionState {
    pub fn new(
        sub_job_id: u32,
        start: Option<Bytes>,
        end: Option<Bytes>,
        meters_blob_garbage: bool,
    ) -> Self {
        Self {
            sub_job_id,
            start,
            end,
            status: None,
            io_status: None,
            outputs: Vec::new(),
            blob_additions: Vec::new(),
            blob_garbage: meters_blob_garbage
                .then(|| Arc::new(Mutex::new(BlobGarbageMeter::default()))),
            iter_stats: CompactionIterationStats::default(),
            job_stats: CompactionJobStats::default(),
            notify_on_completion: false,
        }
    }

    pub fn set_status_if_ok(&mut self, error: StrataError) {
        if self.status.is_none() {
            self.status = Some(error);
        }
    }

    pub fn set_io_status_if_ok(&mut self, error: StrataError) {
        if self.io_status.is_none() {
            self.io_status = Some(error);
        }
    }

    pub fn total_output_bytes(&self) -> u64 {
        self.outputs.iter().map(|o| o.meta.file_size).sum()
    }

    pub fn total_output_records(&self) -> u64 {
        self.outputs.iter().map(|o| o.meta.num_entries).sum()
    }
}
