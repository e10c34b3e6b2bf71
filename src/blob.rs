use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::StrataError;
use crate::filesystem::{WritableFile, WriteFileOptions};
use crate::iter::InternalIterator;
use crate::tablestore::TableStore;
use crate::types::{RowEntry, ValueKind};
use crate::version::FileNumberAllocator;

pub(crate) const BLOB_INDEX_ENCODED_LEN: usize = 24;

/// Value stored in place of a large `Put`: a pointer into a blob sidecar
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex {
    pub blob_file_number: u64,
    pub offset: u64,
    pub size: u64,
}

impl BlobIndex {
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(BLOB_INDEX_ENCODED_LEN);
        buf.write_u64::<LittleEndian>(self.blob_file_number)
            .expect("vec write");
        buf.write_u64::<LittleEndian>(self.offset).expect("vec write");
        buf.write_u64::<LittleEndian>(self.size).expect("vec write");
        Bytes::from(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, StrataError> {
        if buf.len() != BLOB_INDEX_ENCODED_LEN {
            return Err(StrataError::corruption("bad blob index length"));
        }
        Ok(Self {
            blob_file_number: u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes")),
            offset: u64::from_le_bytes(buf[8..16].try_into().expect("8 bytes")),
            size: u64::from_le_bytes(buf[16..24].try_into().expect("8 bytes")),
        })
    }
}

/// Metadata of one blob sidecar file.
#[derive(Debug, Clone)]
pub struct BlobFileMetadata {
    pub blob_file_number: u64,
    pub blob_count: u64,
    pub total_blob_bytes: u64,
    pub checksum: u32,
}

/// Garbage accumulated against one pre-existing blob file by a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobGarbage {
    pub blob_file_number: u64,
    pub count: u64,
    pub bytes: u64,
}

/// Per-blob-file record flow through one sub-compaction: blob references read
/// from the inputs versus blob references surviving into the outputs. The
/// difference is garbage left behind in the blob file.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlobInOutFlow {
    pub in_count: u64,
    pub in_bytes: u64,
    pub out_count: u64,
    pub out_bytes: u64,
}

impl BlobInOutFlow {
    pub fn is_valid(&self) -> bool {
        self.out_count <= self.in_count && self.out_bytes <= self.in_bytes
    }

    pub fn has_garbage(&self) -> bool {
        self.in_count > self.out_count
    }

    pub fn garbage_count(&self) -> u64 {
        self.in_count - self.out_count
    }

    pub fn garbage_bytes(&self) -> u64 {
        self.in_bytes - self.out_bytes
    }
}

#[derive(Debug, Default)]
pub struct BlobGarbageMeter {
    flows: HashMap<u64, BlobInOutFlow>,
}

impl BlobGarbageMeter {
    pub fn process_in_flow(&mut self, entry: &RowEntry) -> Result<(), StrataError> {
        if entry.key.kind != ValueKind::BlobIndex {
            return Ok(());
        }
        let index = BlobIndex::decode(&entry.value)?;
        let flow = self.flows.entry(index.blob_file_number).or_default();
        flow.in_count += 1;
        flow.in_bytes += index.size;
        Ok(())
    }

    pub fn process_out_flow(&mut self, entry: &RowEntry) -> Result<(), StrataError> {
        if entry.key.kind != ValueKind::BlobIndex {
            return Ok(());
        }
        let index = BlobIndex::decode(&entry.value)?;
        // References created by this compaction's own blob builder have no
        // in-flow and never become garbage.
        if let Some(flow) = self.flows.get_mut(&index.blob_file_number) {
            flow.out_count += 1;
            flow.out_bytes += index.size;
        }
        Ok(())
    }

    pub fn flows(&self) -> &HashMap<u64, BlobInOutFlow> {
        &self.flows
    }

    pub fn total_in_count(&self) -> u64 {
        self.flows.values().map(|f| f.in_count).sum()
    }

    pub fn total_in_bytes(&self) -> u64 {
        self.flows.values().map(|f| f.in_bytes).sum()
    }

    pub fn garbage(&self) -> Vec<BlobGarbage> {
        let mut garbage: Vec<BlobGarbage> = self
            .flows
            .iter()
            .filter(|(_, flow)| flow.is_valid() && flow.has_garbage())
            .map(|(file, flow)| BlobGarbage {
                blob_file_number: *file,
                count: flow.garbage_count(),
                bytes: flow.garbage_bytes(),
            })
            .collect();
        garbage.sort_by_key(|g| g.blob_file_number);
        garbage
    }
}

/// Records per-blob-file in-flows while entries stream out of the merging
/// input iterator.
pub struct BlobCountingIterator<T: InternalIterator> {
    inner: T,
    meter: Arc<Mutex<BlobGarbageMeter>>,
}

impl<T: InternalIterator> BlobCountingIterator<T> {
    pub fn new(inner: T, meter: Arc<Mutex<BlobGarbageMeter>>) -> Self {
        Self { inner, meter }
    }
}

impl<T: InternalIterator> InternalIterator for BlobCountingIterator<T> {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        let entry = self.inner.next_entry()?;
        if let Some(entry) = &entry {
            self.meter.lock().process_in_flow(entry)?;
        }
        Ok(entry)
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        self.inner.seek(next_key)
    }
}

/// Writes large values into a blob sidecar file and hands back the
/// `BlobIndex` to store in their place. The file is created lazily on the
/// first value.
pub struct BlobFileBuilder {
    store: Arc<TableStore>,
    file_numbers: Arc<FileNumberAllocator>,
    write_options: WriteFileOptions,
    open: Option<OpenBlobFile>,
}

struct OpenBlobFile {
    blob_file_number: u64,
    file: Box<dyn WritableFile>,
    offset: u64,
    count: u64,
    total_bytes: u64,
    hasher: crc32fast::Hasher,
}

impl BlobFileBuilder {
    pub fn new(
        store: Arc<TableStore>,
        file_numbers: Arc<FileNumberAllocator>,
        write_options: WriteFileOptions,
    ) -> Self {
        Self {
            store,
            file_numbers,
            write_options,
            open: None,
        }
    }

    pub fn add(&mut self, user_key: &[u8], value: &[u8]) -> Result<BlobIndex, StrataError> {
        if self.open.is_none() {
            let blob_file_number = self.file_numbers.next();
            let file = self
                .store
                .new_blob_file(blob_file_number, self.write_options)?;
            self.open = Some(OpenBlobFile {
                blob_file_number,
                file,
                offset: 0,
                count: 0,
                total_bytes: 0,
                hasher: crc32fast::Hasher::new(),
            });
        }
        let open = self.open.as_mut().expect("just opened");

        let mut header = Vec::with_capacity(8);
        header.write_u32::<LittleEndian>(user_key.len() as u32)?;
        header.write_u32::<LittleEndian>(value.len() as u32)?;
        open.file.write_all(&header)?;
        open.file.write_all(user_key)?;
        open.file.write_all(value)?;
        open.hasher.update(&header);
        open.hasher.update(user_key);
        open.hasher.update(value);

        let value_offset = open.offset + 8 + user_key.len() as u64;
        open.offset = value_offset + value.len() as u64;
        open.count += 1;
        open.total_bytes += value.len() as u64;

        Ok(BlobIndex {
            blob_file_number: open.blob_file_number,
            offset: value_offset,
            size: value.len() as u64,
        })
    }

    /// Syncs and closes the sidecar, returning its metadata; `None` when no
    /// value was ever added.
    pub fn finish(mut self) -> Result<Option<BlobFileMetadata>, StrataError> {
        match self.open.take() {
            None => Ok(None),
            Some(mut open) => {
                open.file.sync()?;
                Ok(Some(BlobFileMetadata {
                    blob_file_number: open.blob_file_number,
                    blob_count: open.count,
                    total_blob_bytes: open.total_bytes,
                    checksum: open.hasher.finalize(),
                }))
            }
        }
    }

    /// Drops the partial sidecar after a failed sub-compaction.
    pub fn abandon(mut self) {
        if let Some(open) = self.open.take() {
            let number = open.blob_file_number;
            drop(open.file);
            let _ = self.store.delete_blob(number);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::filesystem::LocalFileSystem;
    use tempfile::tempdir;

    #[test]
    fn blob_index_round_trips() {
        let index = BlobIndex {
            blob_file_number: 9,
            offset: 1024,
            size: 4096,
        };
        assert_eq!(BlobIndex::decode(&index.encode()).unwrap(), index);
        assert!(BlobIndex::decode(b"short").is_err());
    }

    #[test]
    fn meter_reports_garbage_per_blob_file() {
        let mut meter = BlobGarbageMeter::default();
        let kept = RowEntry::new_blob_index(
            b"a",
            BlobIndex {
                blob_file_number: 3,
                offset: 0,
                size: 100,
            }
            .encode(),
            10,
        );
        let dropped = RowEntry::new_blob_index(
            b"b",
            BlobIndex {
                blob_file_number: 3,
                offset: 100,
                size: 50,
            }
            .encode(),
            11,
        );
        meter.process_in_flow(&kept).unwrap();
        meter.process_in_flow(&dropped).unwrap();
        meter.process_out_flow(&kept).unwrap();

        assert_eq!(
            meter.garbage(),
            vec![BlobGarbage {
                blob_file_number: 3,
                count: 1,
                bytes: 50,
            }]
        );
    }

    #[test]
    fn builder_is_lazy_and_accumulates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TableStore::new(
            Arc::new(LocalFileSystem),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        ));
        let numbers = Arc::new(FileNumberAllocator::new(5));

        let empty = BlobFileBuilder::new(store.clone(), numbers.clone(), Default::default());
        assert!(empty.finish().unwrap().is_none());

        let mut builder = BlobFileBuilder::new(store.clone(), numbers, Default::default());
        let a = builder.add(b"k1", b"large-value-1").unwrap();
        let b = builder.add(b"k2", b"large-value-22").unwrap();
        assert_eq!(a.blob_file_number, b.blob_file_number);
        assert!(b.offset > a.offset);

        let meta = builder.finish().unwrap().unwrap();
        assert_eq!(meta.blob_count, 2);
        assert_eq!(meta.total_blob_bytes, 13 + 14);
    }

    #[test]
    fn blob_path_is_namespaced() {
        let store = TableStore::new(
            Arc::new(LocalFileSystem),
            PathBuf::from("/db"),
            PathBuf::from("/blobs"),
        );
        assert_eq!(
            store.blob_path(1),
            PathBuf::from("/blobs/00000000000000000001.blob")
        );
    }
}
