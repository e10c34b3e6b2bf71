use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use bytes::Bytes;
use tracing::trace;

use crate::error::StrataError;
use crate::file_metadata::Temperature;
use crate::write_hint::WriteLifetimeHint;

/// I/O priority applied to output writes; compactions default to low so they
/// yield to user traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoPriority {
    #[default]
    Low,
    High,
    User,
}

/// Why a directory fsync is requested; forwarded to filesystems that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirFsyncReason {
    NewFileSynced,
    FileDeleted,
}

/// Options applied when creating an output file. Plain-filesystem backends
/// may ignore any of them; they are advisory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFileOptions {
    pub temperature: Temperature,
    pub lifetime_hint: WriteLifetimeHint,
    pub io_priority: IoPriority,
}

pub trait WritableFile: Write + Send {
    /// Flushes buffered data and syncs it to stable storage.
    fn sync(&mut self) -> std::io::Result<()>;
}

pub trait FileSystem: Send + Sync {
    fn new_writable_file(
        &self,
        path: &Path,
        options: WriteFileOptions,
    ) -> Result<Box<dyn WritableFile>, StrataError>;

    fn read_file(&self, path: &Path) -> Result<Bytes, StrataError>;

    fn delete_file(&self, path: &Path) -> Result<(), StrataError>;

    fn fsync_dir(&self, dir: &Path, reason: DirFsyncReason) -> Result<(), StrataError>;
}

#[derive(Debug, Default)]
pub struct LocalFileSystem;

struct LocalWritableFile {
    inner: BufWriter<File>,
}

impl Write for LocalWritableFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl WritableFile for LocalWritableFile {
    fn sync(&mut self) -> std::io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()
    }
}

impl FileSystem for LocalFileSystem {
    fn new_writable_file(
        &self,
        path: &Path,
        options: WriteFileOptions,
    ) -> Result<Box<dyn WritableFile>, StrataError> {
        trace!(
            ?path,
            temperature = ?options.temperature,
            lifetime_hint = ?options.lifetime_hint,
            io_priority = ?options.io_priority,
            "creating writable file"
        );
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(LocalWritableFile {
            inner: BufWriter::new(file),
        }))
    }

    fn read_file(&self, path: &Path) -> Result<Bytes, StrataError> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn delete_file(&self, path: &Path) -> Result<(), StrataError> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn fsync_dir(&self, dir: &Path, reason: DirFsyncReason) -> Result<(), StrataError> {
        trace!(?dir, ?reason, "fsync directory");
        File::open(dir)?.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_delete_round_trip() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem;
        let path = dir.path().join("file.sst");

        let mut file = fs
            .new_writable_file(&path, WriteFileOptions::default())
            .unwrap();
        file.write_all(b"payload").unwrap();
        file.sync().unwrap();
        drop(file);

        fs.fsync_dir(dir.path(), DirFsyncReason::NewFileSynced)
            .unwrap();
        assert_eq!(fs.read_file(&path).unwrap().as_ref(), b"payload");

        fs.delete_file(&path).unwrap();
        assert!(fs.read_file(&path).is_err());
    }
}
