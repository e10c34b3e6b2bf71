use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;

use crate::blob::{BlobFileMetadata, BlobGarbage};
use crate::comparator::{InternalKeyComparator, UserComparator};
use crate::compaction::CompactionInputLevel;
use crate::error::StrataError;
use crate::file_metadata::FileMetadata;
use crate::iter::InternalIterator;
use crate::merge_iterator::MergeIterator;
use crate::range_tombstones::CompactionRangeDelAggregator;
use crate::table::{TableIterator, TableReader};
use crate::tablestore::TableStore;
use crate::types::RowEntry;

/// File numbers are allocated atomically outside the database mutex.
#[derive(Debug)]
pub struct FileNumberAllocator(AtomicU64);

impl FileNumberAllocator {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::SeqCst)
    }
}

/// State of one blob file inside a version: its immutable metadata plus the
/// garbage tally accumulated by compactions.
#[derive(Debug, Clone)]
pub struct BlobFileState {
    pub meta: Arc<BlobFileMetadata>,
    pub garbage_count: u64,
    pub garbage_bytes: u64,
}

/// An immutable snapshot of the LSM shape: files per level plus blob files.
#[derive(Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<FileMetadata>>>,
    blob_files: BTreeMap<u64, BlobFileState>,
    compact_cursors: Vec<Option<Bytes>>,
}

impl Version {
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
            blob_files: BTreeMap::new(),
            compact_cursors: vec![None; num_levels],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        &self.levels[level]
    }

    pub fn blob_files(&self) -> &BTreeMap<u64, BlobFileState> {
        &self.blob_files
    }

    pub fn compact_cursor(&self, level: usize) -> Option<&Bytes> {
        self.compact_cursors.get(level).and_then(|c| c.as_ref())
    }

    /// Highest non-empty level plus one; 0 for an empty tree.
    pub fn num_non_empty_levels(&self) -> usize {
        self.levels
            .iter()
            .rposition(|files| !files.is_empty())
            .map(|l| l + 1)
            .unwrap_or(0)
    }

    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self
            .levels
            .iter()
            .map(|files| files.len().to_string())
            .collect();
        format!("files[{}]", counts.join(" "))
    }

    /// Files at `level` whose user-key range intersects `[lo, hi]`
    /// (inclusive); `None` bounds are unbounded.
    pub fn overlapping_files(
        &self,
        level: usize,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        cmp: &Arc<dyn UserComparator>,
    ) -> Vec<Arc<FileMetadata>> {
        if level >= self.levels.len() {
            return Vec::new();
        }
        self.levels[level]
            .iter()
            .filter(|f| file_overlaps_range(f, lo, hi, cmp))
            .cloned()
            .collect()
    }

    /// Approximate bytes stored in `[a, b)` across `[from_level, to_level]`.
    /// Files fully inside the range contribute their whole size, partial
    /// overlaps contribute half; the estimate never needs file I/O.
    pub fn approximate_size(
        &self,
        cmp: &Arc<dyn UserComparator>,
        a: &[u8],
        b: &[u8],
        from_level: usize,
        to_level: usize,
    ) -> u64 {
        let mut total = 0u64;
        for level in from_level..=to_level.min(self.levels.len().saturating_sub(1)) {
            for f in &self.levels[level] {
                let (Some(smallest), Some(largest)) = (f.smallest_user_key(), f.largest_user_key())
                else {
                    continue;
                };
                if cmp.compare(largest, a) == Ordering::Less
                    || cmp.compare(smallest, b) != Ordering::Less
                {
                    continue;
                }
                let fully_contained = cmp.compare(smallest, a) != Ordering::Less
                    && cmp.compare(largest, b) == Ordering::Less;
                total += if fully_contained {
                    f.file_size
                } else {
                    f.file_size / 2
                };
            }
        }
        total
    }
}

fn file_overlaps_range(
    f: &FileMetadata,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    cmp: &Arc<dyn UserComparator>,
) -> bool {
    let (Some(smallest), Some(largest)) = (f.smallest_user_key(), f.largest_user_key()) else {
        return true;
    };
    if let Some(lo) = lo {
        if cmp.compare(largest, lo) == Ordering::Less {
            return false;
        }
    }
    if let Some(hi) = hi {
        if cmp.compare(smallest, hi) == Ordering::Greater {
            return false;
        }
    }
    true
}

/// Half-open variant used when clipping inputs to a sub-compaction slice
/// `[lower, upper)`.
fn file_overlaps_slice(
    f: &FileMetadata,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    cmp: &Arc<dyn UserComparator>,
) -> bool {
    let (Some(smallest), Some(largest)) = (f.smallest_user_key(), f.largest_user_key()) else {
        return true;
    };
    if let Some(lower) = lower {
        if cmp.compare(largest, lower) == Ordering::Less {
            return false;
        }
    }
    if let Some(upper) = upper {
        if cmp.compare(smallest, upper) != Ordering::Less {
            return false;
        }
    }
    true
}

/// Atomic delta applied to the logical LSM view: either every change lands or
/// none does.
#[derive(Debug, Default)]
pub struct VersionEdit {
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, Arc<FileMetadata>)>,
    pub blob_additions: Vec<Arc<BlobFileMetadata>>,
    pub blob_garbage: Vec<BlobGarbage>,
    pub compaction_cursor: Option<(usize, Bytes)>,
}

impl VersionEdit {
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.push((level, file_number));
    }

    pub fn add_file(&mut self, level: usize, meta: Arc<FileMetadata>) {
        self.new_files.push((level, meta));
    }

    pub fn add_blob_file(&mut self, meta: Arc<BlobFileMetadata>) {
        self.blob_additions.push(meta);
    }

    pub fn add_blob_file_garbage(&mut self, garbage: BlobGarbage) {
        self.blob_garbage.push(garbage);
    }

    pub fn set_compaction_cursor(&mut self, level: usize, cursor: Bytes) {
        self.compaction_cursor = Some((level, cursor));
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_files.is_empty()
            && self.new_files.is_empty()
            && self.blob_additions.is_empty()
            && self.blob_garbage.is_empty()
            && self.compaction_cursor.is_none()
    }
}

/// Names files and owns the logical version history. Mutating calls run
/// under the database mutex (the engine wraps the set in one); file-number
/// allocation is atomic and lock-free.
pub struct VersionSet {
    cmp: Arc<dyn UserComparator>,
    current: Arc<Version>,
    file_numbers: Arc<FileNumberAllocator>,
    last_sequence: u64,
    io_status: Option<StrataError>,
}

impl VersionSet {
    pub fn new(cmp: Arc<dyn UserComparator>, num_levels: usize) -> Self {
        Self {
            cmp,
            current: Arc::new(Version::new(num_levels)),
            file_numbers: Arc::new(FileNumberAllocator::new(1)),
            last_sequence: 0,
            io_status: None,
        }
    }

    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    pub fn file_numbers(&self) -> Arc<FileNumberAllocator> {
        self.file_numbers.clone()
    }

    pub fn new_file_number(&self) -> u64 {
        self.file_numbers.next()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    /// I/O failures of the logical-log writer; drives the background error
    /// handler separately from logical failures.
    pub fn io_status(&self) -> Option<&StrataError> {
        self.io_status.as_ref()
    }

    /// Applies the edit atomically: the new version replaces `current` only
    /// after every change validated, so a failed apply leaves the view
    /// untouched.
    pub fn log_and_apply(&mut self, edit: VersionEdit) -> Result<(), StrataError> {
        let mut levels = self.current.levels.clone();
        let mut blob_files = self.current.blob_files.clone();
        let mut compact_cursors = self.current.compact_cursors.clone();

        for (level, file_number) in &edit.deleted_files {
            let files = levels.get_mut(*level).ok_or_else(|| {
                StrataError::invalid_argument(format!("delete references level {}", level))
            })?;
            let idx = files
                .iter()
                .position(|f| f.file_number == *file_number)
                .ok_or_else(|| {
                    StrataError::invalid_argument(format!(
                        "file #{} not found at level {}",
                        file_number, level
                    ))
                })?;
            files.remove(idx);
        }

        for (level, meta) in &edit.new_files {
            let files = levels.get_mut(*level).ok_or_else(|| {
                StrataError::invalid_argument(format!("add references level {}", level))
            })?;
            files.push(meta.clone());
        }

        // L0 is ordered newest-first; deeper levels are range-partitioned and
        // ordered by smallest key.
        if let Some(l0) = levels.first_mut() {
            l0.sort_by(|a, b| b.largest_seq.cmp(&a.largest_seq));
        }
        let cmp = self.cmp.clone();
        for files in levels.iter_mut().skip(1) {
            files.sort_by(|a, b| {
                match (a.smallest_user_key(), b.smallest_user_key()) {
                    (Some(a), Some(b)) => cmp.compare(a, b),
                    _ => Ordering::Equal,
                }
            });
        }

        for meta in &edit.blob_additions {
            blob_files.insert(
                meta.blob_file_number,
                BlobFileState {
                    meta: meta.clone(),
                    garbage_count: 0,
                    garbage_bytes: 0,
                },
            );
        }
        for garbage in &edit.blob_garbage {
            let state = blob_files.get_mut(&garbage.blob_file_number).ok_or_else(|| {
                StrataError::invalid_argument(format!(
                    "blob garbage references unknown blob file #{}",
                    garbage.blob_file_number
                ))
            })?;
            state.garbage_count += garbage.count;
            state.garbage_bytes += garbage.bytes;
        }

        if let Some((level, cursor)) = &edit.compaction_cursor {
            if let Some(slot) = compact_cursors.get_mut(*level) {
                *slot = Some(cursor.clone());
            }
        }

        self.current = Arc::new(Version {
            levels,
            blob_files,
            compact_cursors,
        });
        Ok(())
    }
}

/// Concatenating cursor over the range-partitioned files of one level > 0.
pub struct LevelIterator {
    readers: Vec<Arc<TableReader>>,
    cmp: Arc<dyn UserComparator>,
    next_file: usize,
    current: Option<TableIterator>,
}

impl LevelIterator {
    pub fn new(readers: Vec<Arc<TableReader>>, cmp: Arc<dyn UserComparator>) -> Self {
        Self {
            readers,
            cmp,
            next_file: 0,
            current: None,
        }
    }
}

impl InternalIterator for LevelIterator {
    fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        loop {
            if self.current.is_none() {
                if self.next_file >= self.readers.len() {
                    return Ok(None);
                }
                self.current = Some(self.readers[self.next_file].iter(self.cmp.clone()));
                self.next_file += 1;
            }
            match self.current.as_mut().expect("just filled").next_entry()? {
                Some(entry) => return Ok(Some(entry)),
                None => self.current = None,
            }
        }
    }

    fn seek(&mut self, next_key: &[u8]) -> Result<(), StrataError> {
        // First file whose largest key reaches the target.
        let start = self.readers.partition_point(|r| match r.largest() {
            Some(largest) => self.cmp.compare(&largest.user_key, next_key) == Ordering::Less,
            None => true,
        });
        self.next_file = start;
        self.current = None;
        if self.next_file < self.readers.len() {
            let mut iter = self.readers[self.next_file].iter(self.cmp.clone());
            iter.seek(next_key)?;
            self.current = Some(iter);
            self.next_file += 1;
        }
        Ok(())
    }
}

/// Builds the merged input stream for one sub-compaction slice. Input files
/// wholly outside `[lower, upper)` are never opened; range deletions of the
/// opened files are drained into the aggregator.
pub fn make_input_iterator(
    inputs: &[CompactionInputLevel],
    cmp: Arc<dyn UserComparator>,
    store: &TableStore,
    range_del_agg: &mut CompactionRangeDelAggregator,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Result<Box<dyn InternalIterator>, StrataError> {
    let icmp = InternalKeyComparator::new(cmp.clone());
    let mut cursors: Vec<Box<dyn InternalIterator>> = Vec::new();
    for input in inputs {
        if input.level == 0 {
            // L0 files overlap each other; one cursor per file.
            for meta in &input.files {
                if !file_overlaps_slice(meta, lower, upper, &cmp) {
                    continue;
                }
                let reader = store.open_table(meta.file_number)?;
                range_del_agg.add_tombstones(reader.range_tombstones().iter().cloned());
                cursors.push(Box::new(reader.iter(cmp.clone())));
            }
        } else {
            let mut readers = Vec::new();
            for meta in &input.files {
                if !file_overlaps_slice(meta, lower, upper, &cmp) {
                    continue;
                }
                let reader = store.open_table(meta.file_number)?;
                range_del_agg.add_tombstones(reader.range_tombstones().iter().cloned());
                readers.push(reader);
            }
            if !readers.is_empty() {
                cursors.push(Box::new(LevelIterator::new(readers, cmp.clone())));
            }
        }
    }
    Ok(Box::new(MergeIterator::new(icmp, cursors)?))
}
