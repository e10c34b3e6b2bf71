use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StrataError;
use crate::filesystem::{DirFsyncReason, FileSystem, WritableFile, WriteFileOptions};
use crate::table::TableReader;

/// Names, creates, opens, and deletes the files the engine touches, and
/// tracks cumulative bytes added for the space-limit check. Table and blob
/// files may live in distinct directories.
pub struct TableStore {
    fs: Arc<dyn FileSystem>,
    table_dir: PathBuf,
    blob_dir: PathBuf,
    bytes_added: AtomicU64,
}

impl TableStore {
    pub fn new(fs: Arc<dyn FileSystem>, table_dir: PathBuf, blob_dir: PathBuf) -> Self {
        Self {
            fs,
            table_dir,
            blob_dir,
            bytes_added: AtomicU64::new(0),
        }
    }

    pub fn table_path(&self, file_number: u64) -> PathBuf {
        self.table_dir.join(format!("{:020}.sst", file_number))
    }

    pub fn blob_path(&self, file_number: u64) -> PathBuf {
        self.blob_dir.join(format!("{:020}.blob", file_number))
    }

    pub fn new_table_file(
        &self,
        file_number: u64,
        options: WriteFileOptions,
    ) -> Result<Box<dyn WritableFile>, StrataError> {
        self.fs
            .new_writable_file(&self.table_path(file_number), options)
    }

    pub fn new_blob_file(
        &self,
        file_number: u64,
        options: WriteFileOptions,
    ) -> Result<Box<dyn WritableFile>, StrataError> {
        self.fs
            .new_writable_file(&self.blob_path(file_number), options)
    }

    pub fn open_table(&self, file_number: u64) -> Result<Arc<TableReader>, StrataError> {
        let raw = self.fs.read_file(&self.table_path(file_number))?;
        Ok(Arc::new(TableReader::open(file_number, raw)?))
    }

    pub fn delete_table(&self, file_number: u64) -> Result<(), StrataError> {
        self.fs.delete_file(&self.table_path(file_number))
    }

    pub fn delete_blob(&self, file_number: u64) -> Result<(), StrataError> {
        self.fs.delete_file(&self.blob_path(file_number))
    }

    pub fn sync_table_dir(&self, reason: DirFsyncReason) -> Result<(), StrataError> {
        self.fs.fsync_dir(&self.table_dir, reason)
    }

    pub fn sync_blob_dir(&self, reason: DirFsyncReason) -> Result<(), StrataError> {
        self.fs.fsync_dir(&self.blob_dir, reason)
    }

    pub fn has_distinct_blob_dir(&self) -> bool {
        self.table_dir != self.blob_dir
    }

    /// Records bytes added by a finished output and returns the new total.
    pub fn add_written_bytes(&self, bytes: u64) -> u64 {
        self.bytes_added.fetch_add(bytes, Ordering::Relaxed) + bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::table::TableBuilder;
    use crate::types::RowEntry;
    use tempfile::tempdir;

    #[test]
    fn names_files_by_zero_padded_number() {
        let store = TableStore::new(
            Arc::new(LocalFileSystem),
            PathBuf::from("/db"),
            PathBuf::from("/db/blob"),
        );
        assert_eq!(
            store.table_path(42),
            PathBuf::from("/db/00000000000000000042.sst")
        );
        assert_eq!(
            store.blob_path(42),
            PathBuf::from("/db/blob/00000000000000000042.blob")
        );
        assert!(store.has_distinct_blob_dir());
    }

    #[test]
    fn create_open_delete_round_trip() {
        let dir = tempdir().unwrap();
        let store = TableStore::new(
            Arc::new(LocalFileSystem),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        );
        let mut builder = TableBuilder::new(
            store
                .new_table_file(7, WriteFileOptions::default())
                .unwrap(),
        );
        builder.add(&RowEntry::new_put(b"k", b"v", 1)).unwrap();
        builder.finish().unwrap();

        let reader = store.open_table(7).unwrap();
        assert_eq!(reader.num_entries(), 1);

        store.delete_table(7).unwrap();
        assert!(store.open_table(7).is_err());
    }

    #[test]
    fn tracks_cumulative_added_bytes() {
        let store = TableStore::new(
            Arc::new(LocalFileSystem),
            PathBuf::from("/db"),
            PathBuf::from("/db"),
        );
        assert_eq!(store.add_written_bytes(100), 100);
        assert_eq!(store.add_written_bytes(50), 150);
    }
}
