use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;

use crate::comparator::UserComparator;
use crate::error::StrataError;
use crate::filesystem::WritableFile;
use crate::iter::InternalIterator;
use crate::range_tombstones::RangeTombstone;
use crate::types::{InternalKey, RowEntry, ValueKind};

pub(crate) const TABLE_MAGIC: u32 = 0x5354_4254; // "STBT"
pub(crate) const TABLE_FOOTER_LEN: usize = 40;

/// Format v1:
///
/// ```text
/// [point records]   u32 key_len | u32 value_len | internal key | value
/// [range tombstones] u32 start_len | u32 end_len | u64 seq | start | end
/// [footer]          u64 data_size | u64 tombstone_size
///                   u64 num_entries | u64 num_range_deletions
///                   u32 crc32(data + tombstones) | u32 magic
/// ```
///
/// The engine treats the format as opaque: it only appends sorted entries
/// through the builder and replays them through the reader.
pub struct TableBuilder {
    file: Option<Box<dyn WritableFile>>,
    hasher: crc32fast::Hasher,
    data_size: u64,
    num_entries: u64,
    tombstones: Vec<RangeTombstone>,
}

/// Summary of a finished table file.
#[derive(Debug, Clone, Copy)]
pub struct TableFileInfo {
    pub file_size: u64,
    pub num_entries: u64,
    pub num_range_deletions: u64,
    pub checksum: u32,
}

impl TableBuilder {
    pub fn new(file: Box<dyn WritableFile>) -> Self {
        Self {
            file: Some(file),
            hasher: crc32fast::Hasher::new(),
            data_size: 0,
            num_entries: 0,
            tombstones: Vec::new(),
        }
    }

    pub fn add(&mut self, entry: &RowEntry) -> Result<(), StrataError> {
        let key = entry.key.encode();
        let mut frame = Vec::with_capacity(8 + key.len() + entry.value.len());
        frame.write_u32::<LittleEndian>(key.len() as u32)?;
        frame.write_u32::<LittleEndian>(entry.value.len() as u32)?;
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&entry.value);
        self.write_frame(&frame)?;
        self.data_size += frame.len() as u64;
        self.num_entries += 1;
        Ok(())
    }

    pub fn add_range_tombstone(&mut self, tombstone: RangeTombstone) {
        self.tombstones.push(tombstone);
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn num_range_deletions(&self) -> u64 {
        self.tombstones.len() as u64
    }

    /// Bytes accumulated so far; drives the file-size cut policy.
    pub fn estimated_size(&self) -> u64 {
        self.data_size
    }

    /// Writes the tombstone block and footer, syncs, and closes the file.
    pub fn finish(mut self) -> Result<TableFileInfo, StrataError> {
        let mut tombstone_block = Vec::new();
        for t in &self.tombstones {
            tombstone_block.write_u32::<LittleEndian>(t.start.len() as u32)?;
            tombstone_block.write_u32::<LittleEndian>(t.end.len() as u32)?;
            tombstone_block.write_u64::<LittleEndian>(t.seq)?;
            tombstone_block.extend_from_slice(&t.start);
            tombstone_block.extend_from_slice(&t.end);
        }
        self.write_frame(&tombstone_block)?;
        let checksum = self.hasher.clone().finalize();

        let mut footer = Vec::with_capacity(TABLE_FOOTER_LEN);
        footer.write_u64::<LittleEndian>(self.data_size)?;
        footer.write_u64::<LittleEndian>(tombstone_block.len() as u64)?;
        footer.write_u64::<LittleEndian>(self.num_entries)?;
        footer.write_u64::<LittleEndian>(self.tombstones.len() as u64)?;
        footer.write_u32::<LittleEndian>(checksum)?;
        footer.write_u32::<LittleEndian>(TABLE_MAGIC)?;

        let mut file = self.file.take().expect("builder already finished");
        file.write_all(&footer)?;
        file.sync()?;

        Ok(TableFileInfo {
            file_size: self.data_size + tombstone_block.len() as u64 + TABLE_FOOTER_LEN as u64,
            num_entries: self.num_entries,
            num_range_deletions: self.tombstones.len() as u64,
            checksum,
        })
    }

    /// Drops the builder without writing a footer; the caller deletes the
    /// partial file.
    pub fn abandon(mut self) {
        self.file.take();
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), StrataError> {
        self.hasher.update(frame);
        self.file
            .as_mut()
            .expect("builder already finished")
            .write_all(frame)?;
        Ok(())
    }
}

/// Read side of the table format. Holds the whole file and decodes records
/// lazily off record offsets built at open.
pub struct TableReader {
    pub file_number: u64,
    data: Bytes,
    index: Vec<u32>,
    num_entries: u64,
    num_range_deletions: u64,
    checksum: u32,
    file_size: u64,
    tombstones: Vec<RangeTombstone>,
    smallest: Option<InternalKey>,
    largest: Option<InternalKey>,
}

impl TableReader {
    pub fn open(file_number: u64, raw: Bytes) -> Result<Self, StrataError> {
        if raw.len() < TABLE_FOOTER_LEN {
            return Err(StrataError::corruption("table file too small"));
        }
        let footer = &raw[raw.len() - TABLE_FOOTER_LEN..];
        let data_size = read_u64(footer, 0) as usize;
        let tombstone_size = read_u64(footer, 8) as usize;
        let num_entries = read_u64(footer, 16);
        let num_range_deletions = read_u64(footer, 24);
        let checksum = read_u32(footer, 32);
        let magic = read_u32(footer, 36);
        if magic != TABLE_MAGIC {
            return Err(StrataError::corruption("bad table magic"));
        }
        if data_size + tombstone_size + TABLE_FOOTER_LEN != raw.len() {
            return Err(StrataError::corruption("table region sizes do not add up"));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&raw[..data_size + tombstone_size]);
        if hasher.finalize() != checksum {
            return Err(StrataError::ChecksumMismatch);
        }

        let data = raw.slice(..data_size);
        let mut index = Vec::new();
        let mut off = 0usize;
        while off < data.len() {
            if off + 8 > data.len() {
                return Err(StrataError::corruption("truncated record header"));
            }
            let key_len = read_u32(&data, off) as usize;
            let value_len = read_u32(&data, off + 4) as usize;
            let end = off + 8 + key_len + value_len;
            if end > data.len() {
                return Err(StrataError::corruption("record overruns data region"));
            }
            index.push(off as u32);
            off = end;
        }
        if index.len() as u64 != num_entries {
            return Err(StrataError::corruption("entry count mismatch"));
        }

        let mut tombstones = Vec::with_capacity(num_range_deletions as usize);
        let tombstone_block = raw.slice(data_size..data_size + tombstone_size);
        let mut off = 0usize;
        for _ in 0..num_range_deletions {
            if off + 16 > tombstone_block.len() {
                return Err(StrataError::corruption("truncated tombstone header"));
            }
            let start_len = read_u32(&tombstone_block, off) as usize;
            let end_len = read_u32(&tombstone_block, off + 4) as usize;
            let seq = read_u64(&tombstone_block, off + 8);
            let body = off + 16;
            if body + start_len + end_len > tombstone_block.len() {
                return Err(StrataError::corruption("tombstone overruns block"));
            }
            tombstones.push(RangeTombstone {
                start: tombstone_block.slice(body..body + start_len),
                end: tombstone_block.slice(body + start_len..body + start_len + end_len),
                seq,
            });
            off = body + start_len + end_len;
        }

        let mut reader = Self {
            file_number,
            data,
            index,
            num_entries,
            num_range_deletions,
            checksum,
            file_size: raw.len() as u64,
            tombstones,
            smallest: None,
            largest: None,
        };
        reader.smallest = reader.boundary_key(true);
        reader.largest = reader.boundary_key(false);
        Ok(reader)
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn num_range_deletions(&self) -> u64 {
        self.num_range_deletions
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn range_tombstones(&self) -> &[RangeTombstone] {
        &self.tombstones
    }

    pub fn smallest(&self) -> Option<&InternalKey> {
        self.smallest.as_ref()
    }

    pub fn largest(&self) -> Option<&InternalKey> {
        self.largest.as_ref()
    }

    pub fn iter(self: &Arc<Self>, cmp: Arc<dyn UserComparator>) -> TableIterator {
        TableIterator {
            reader: self.clone(),
            cmp,
            pos: 0,
        }
    }

    fn entry_at(&self, idx: usize) -> Result<RowEntry, StrataError> {
        let off = self.index[idx] as usize;
        let key_len = read_u32(&self.data, off) as usize;
        let value_len = read_u32(&self.data, off + 4) as usize;
        let key_start = off + 8;
        let key = InternalKey::decode(&self.data[key_start..key_start + key_len])?;
        let value = self
            .data
            .slice(key_start + key_len..key_start + key_len + value_len);
        Ok(RowEntry::new(key, value))
    }

    fn user_key_at(&self, idx: usize) -> Result<Bytes, StrataError> {
        let off = self.index[idx] as usize;
        let key_len = read_u32(&self.data, off) as usize;
        if key_len < 8 {
            return Err(StrataError::corruption("internal key too short"));
        }
        let key_start = off + 8;
        Ok(self.data.slice(key_start..key_start + key_len - 8))
    }

    fn boundary_key(&self, smallest: bool) -> Option<InternalKey> {
        let mut boundary: Option<InternalKey> = None;
        let point = if smallest {
            self.index.first().and_then(|_| self.entry_at(0).ok())
        } else {
            let n = self.index.len();
            if n == 0 {
                None
            } else {
                self.entry_at(n - 1).ok()
            }
        };
        if let Some(p) = point {
            boundary = Some(p.key);
        }
        for t in &self.tombstones {
            let candidate = if smallest {
                InternalKey::new(t.start.clone(), t.seq, ValueKind::RangeDelete)
            } else {
                InternalKey::new(t.end.clone(), t.seq, ValueKind::RangeDelete)
            };
            boundary = Some(match boundary.take() {
                None => candidate,
                Some(current) => {
                    let keep_candidate = if smallest {
                        candidate.user_key < current.user_key
                    } else {
                        candidate.user_key > current.user_key
                    };
                    if keep_candidate {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        boundary
    }
}

pub struct TableIterator {
    reader: Arc<TableReader>,
    cmp: Arc<dyn UserComparator>,
    pos: usize,
}

impl InternalIterator for TableIterator {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        if self.pos >= self.reader.index.len() {
            return Ok(None);
        }
        let idx = self.pos;
        // Advance first so a corrupt record can be skipped by a tolerant
        // caller retrying next_entry.
        self.pos += 1;
        self.reader.entry_at(idx).map(Some)
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        let mut lo = 0usize;
        let mut hi = self.reader.index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.reader.user_key_at(mid) {
                Ok(uk) => {
                    if self.cmp.compare(&uk, next_key) == Ordering::Less {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                // Fall back to a linear scan if a record in the probe path is
                // unreadable.
                Err(_) => {
                    lo = self.linear_seek(next_key);
                    hi = lo;
                }
            }
        }
        self.pos = lo;
        Ok(())
    }
}

impl TableIterator {
    fn linear_seek(&self, next_key: &[u8]) -> usize {
        for idx in 0..self.reader.index.len() {
            if let Ok(uk) = self.reader.user_key_at(idx) {
                if self.cmp.compare(&uk, next_key) != Ordering::Less {
                    return idx;
                }
            }
        }
        self.reader.index.len()
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().expect("4 bytes"))
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().expect("8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::filesystem::{FileSystem, LocalFileSystem, WriteFileOptions};
    use crate::test_utils::assert_iterator;
    use tempfile::tempdir;

    fn build_table(entries: &[RowEntry], tombstones: &[RangeTombstone]) -> Arc<TableReader> {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem;
        let path = dir.path().join("1.sst");
        let mut builder =
            TableBuilder::new(fs.new_writable_file(&path, WriteFileOptions::default()).unwrap());
        for e in entries {
            builder.add(e).unwrap();
        }
        for t in tombstones {
            builder.add_range_tombstone(t.clone());
        }
        let info = builder.finish().unwrap();
        let raw = fs.read_file(&path).unwrap();
        assert_eq!(info.file_size, raw.len() as u64);
        Arc::new(TableReader::open(1, raw).unwrap())
    }

    #[test]
    fn builds_and_replays_point_entries() {
        let entries = vec![
            RowEntry::new_put(b"a", b"1", 10),
            RowEntry::new_delete(b"b", 11),
            RowEntry::new_put(b"c", b"3", 12),
        ];
        let reader = build_table(&entries, &[]);
        assert_eq!(reader.num_entries(), 3);
        assert_eq!(reader.num_range_deletions(), 0);
        assert_eq!(reader.smallest().unwrap().user_key.as_ref(), b"a");
        assert_eq!(reader.largest().unwrap().user_key.as_ref(), b"c");
        let mut iter = reader.iter(Arc::new(BytewiseComparator));
        assert_iterator(&mut iter, &entries);
    }

    #[test]
    fn persists_range_tombstones() {
        let tombstone = RangeTombstone {
            start: Bytes::from_static(b"a"),
            end: Bytes::from_static(b"m"),
            seq: 44,
        };
        let reader = build_table(&[RowEntry::new_put(b"x", b"1", 10)], &[tombstone.clone()]);
        assert_eq!(reader.range_tombstones(), &[tombstone]);
        assert_eq!(reader.smallest().unwrap().user_key.as_ref(), b"a");
        assert_eq!(reader.largest().unwrap().user_key.as_ref(), b"x");
    }

    #[test]
    fn seek_positions_at_first_matching_user_key() {
        let entries = vec![
            RowEntry::new_put(b"a", b"1", 10),
            RowEntry::new_put(b"b", b"new", 12),
            RowEntry::new_put(b"b", b"old", 5),
            RowEntry::new_put(b"d", b"4", 9),
        ];
        let reader = build_table(&entries, &[]);
        let mut iter = reader.iter(Arc::new(BytewiseComparator));
        iter.seek(b"b").unwrap();
        assert_iterator(
            &mut iter,
            &[
                RowEntry::new_put(b"b", b"new", 12),
                RowEntry::new_put(b"b", b"old", 5),
                RowEntry::new_put(b"d", b"4", 9),
            ],
        );
    }

    #[test]
    fn open_rejects_corrupted_payload() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem;
        let path = dir.path().join("2.sst");
        let mut builder =
            TableBuilder::new(fs.new_writable_file(&path, WriteFileOptions::default()).unwrap());
        builder.add(&RowEntry::new_put(b"k", b"v", 1)).unwrap();
        builder.finish().unwrap();

        let mut raw = fs.read_file(&path).unwrap().to_vec();
        raw[10] ^= 0xFF;
        assert!(matches!(
            TableReader::open(2, Bytes::from(raw)),
            Err(StrataError::ChecksumMismatch)
        ));
    }
}
