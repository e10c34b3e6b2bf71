use std::path::PathBuf;

use crate::error::StrataError;

/// Identity of one output file as seen by creation listeners.
#[derive(Debug, Clone)]
pub struct TableFileCreationInfo {
    pub column_family: String,
    pub file_path: PathBuf,
    pub file_number: u64,
    pub job_id: u32,
    pub file_size: u64,
}

#[derive(Debug, Clone)]
pub struct SubcompactionJobInfo {
    pub column_family: String,
    pub job_id: u32,
    pub sub_job_id: u32,
    pub base_input_level: usize,
    pub output_level: usize,
    pub status: Option<StrataError>,
}

/// Optional observer for job progress. Callbacks run on the worker thread
/// that produced the event and must not call back into the engine.
pub trait EventListener: Send + Sync {
    fn on_table_file_creation_started(&self, _info: &TableFileCreationInfo) {}

    fn on_table_file_creation_finished(
        &self,
        _info: &TableFileCreationInfo,
        _status: &Result<(), StrataError>,
    ) {
    }

    fn on_subcompaction_begin(&self, _info: &SubcompactionJobInfo) {}

    fn on_subcompaction_completed(&self, _info: &SubcompactionJobInfo) {}
}
