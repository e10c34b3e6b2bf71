use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use parking_lot::Mutex;

use crate::blob::{BlobGarbageMeter, BlobIndex};
use crate::comparator::InternalKeyComparator;
use crate::compaction::CompactionDescriptor;
use crate::config::CompactionJobOptions;
use crate::error::StrataError;
use crate::file_metadata::{unique_file_id, FileMetadata, Temperature};
use crate::filesystem::WriteFileOptions;
use crate::log_buffer::LogBuffer;
use crate::output_validator::OutputValidator;
use crate::range_tombstones::CompactionRangeDelAggregator;
use crate::stats::CompactionIterationStats;
use crate::subcompaction::FinishedOutput;
use crate::table::TableBuilder;
use crate::tablestore::TableStore;
use crate::types::{InternalKey, RowEntry, ValueKind, MAX_SEQUENCE};
use crate::version::FileNumberAllocator;
use crate::write_hint::{log_output_file_priority, WriteLifetimeHint};
use crate::listener::TableFileCreationInfo;

struct OpenOutput {
    builder: TableBuilder,
    validator: OutputValidator,
    meta: FileMetadata,
}

/// Owns the output files of one sub-compaction: opens one at a time,
/// enforces the size and grandparent-overlap cut policy, places clipped
/// range tombstones, and finalizes each file with checksum, sync, and the
/// empty-file rule.
pub(crate) struct CompactionOutputs<'a> {
    descriptor: &'a CompactionDescriptor,
    options: &'a CompactionJobOptions,
    store: &'a TableStore,
    file_numbers: &'a FileNumberAllocator,
    log_buffer: &'a Mutex<LogBuffer>,
    blob_garbage: Option<Arc<Mutex<BlobGarbageMeter>>>,
    job_id: u32,
    write_hint: WriteLifetimeHint,
    bottommost_level: bool,
    slice_start: Option<Bytes>,
    slice_end: Option<Bytes>,
    grandparents: Vec<Arc<FileMetadata>>,
    grandparent_index: usize,
    overlapped_bytes: u64,
    /// Lower edge of the next output's range-tombstone window; advances to
    /// each finished file's upper edge so spans never repeat across files.
    range_del_lower: Option<Bytes>,
    icmp: InternalKeyComparator,
    current: Option<OpenOutput>,
    outputs: Vec<FinishedOutput>,
}

#[allow(clippy::too_many_arguments)]
impl<'a> CompactionOutputs<'a> {
    pub(crate) fn new(
        descriptor: &'a CompactionDescriptor,
        options: &'a CompactionJobOptions,
        store: &'a TableStore,
        file_numbers: &'a FileNumberAllocator,
        log_buffer: &'a Mutex<LogBuffer>,
        blob_garbage: Option<Arc<Mutex<BlobGarbageMeter>>>,
        job_id: u32,
        write_hint: WriteLifetimeHint,
        bottommost_level: bool,
        slice_start: Option<Bytes>,
        slice_end: Option<Bytes>,
        grandparents: Vec<Arc<FileMetadata>>,
    ) -> Self {
        let icmp = InternalKeyComparator::new(descriptor.comparator.clone());
        Self {
            descriptor,
            options,
            store,
            file_numbers,
            log_buffer,
            blob_garbage,
            job_id,
            write_hint,
            bottommost_level,
            range_del_lower: slice_start.clone(),
            slice_start,
            slice_end,
            grandparents,
            grandparent_index: 0,
            overlapped_bytes: 0,
            icmp,
            current: None,
            outputs: Vec::new(),
        }
    }

    pub(crate) fn has_open_output(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn into_outputs(self) -> Vec<FinishedOutput> {
        debug_assert!(self.current.is_none());
        self.outputs
    }

    fn open_output(&mut self) -> Result<(), StrataError> {
        debug_assert!(self.current.is_none());
        let file_number = self.file_numbers.next();
        let info = TableFileCreationInfo {
            column_family: self.descriptor.column_family.clone(),
            file_path: self.store.table_path(file_number),
            file_number,
            job_id: self.job_id,
            file_size: 0,
        };
        for listener in &self.options.listeners {
            listener.on_table_file_creation_started(&info);
        }

        let mut temperature = self.descriptor.output_temperature;
        if temperature == Temperature::Unknown && self.bottommost_level {
            temperature = self.descriptor.bottommost_temperature;
        }
        let file = self.store.new_table_file(
            file_number,
            WriteFileOptions {
                temperature,
                lifetime_hint: self.write_hint,
                io_priority: self.descriptor.rate_priority,
            },
        )?;

        let creation_time = self.options.clock.now_micros() / 1_000_000;
        let oldest_ancester_time = self
            .descriptor
            .min_input_oldest_ancester_time(self.slice_start.as_deref(), self.slice_end.as_deref())
            .unwrap_or(creation_time);

        self.current = Some(OpenOutput {
            builder: TableBuilder::new(file),
            validator: OutputValidator::new(self.icmp.clone()),
            meta: FileMetadata {
                file_number,
                file_size: 0,
                smallest: None,
                largest: None,
                smallest_seq: u64::MAX,
                largest_seq: 0,
                num_entries: 0,
                num_range_deletions: 0,
                creation_time,
                oldest_ancester_time,
                oldest_blob_file_number: None,
                temperature,
                file_checksum: 0,
                unique_id: unique_file_id(&self.options.db_id, &self.options.session_id, file_number),
            },
        });
        self.overlapped_bytes = 0;
        Ok(())
    }

    pub(crate) fn add(&mut self, entry: RowEntry) -> Result<(), StrataError> {
        if self.current.is_none() {
            self.open_output()?;
        }
        let out = self.current.as_mut().expect("just opened");
        out.validator.add(&entry)?;
        out.builder.add(&entry)?;

        if entry.key.kind == ValueKind::BlobIndex {
            if let Some(meter) = &self.blob_garbage {
                meter.lock().process_out_flow(&entry)?;
            }
            let index = BlobIndex::decode(&entry.value)?;
            out.meta.oldest_blob_file_number = Some(
                out.meta
                    .oldest_blob_file_number
                    .map_or(index.blob_file_number, |n| n.min(index.blob_file_number)),
            );
        }

        if out.meta.smallest.is_none() {
            out.meta.smallest = Some(entry.key.clone());
        }
        out.meta.largest = Some(entry.key.clone());
        out.meta.smallest_seq = out.meta.smallest_seq.min(entry.key.seq);
        out.meta.largest_seq = out.meta.largest_seq.max(entry.key.seq);
        out.meta.num_entries += 1;
        Ok(())
    }

    /// True when the open output must close before `next_user_key` is added:
    /// the built size reached the target, or (above L0, per-key placement
    /// off) the projected next-level overlap for the open file grew past the
    /// overlap bound.
    pub(crate) fn should_cut_before(&mut self, next_user_key: &[u8]) -> bool {
        let Some(out) = &self.current else {
            return false;
        };
        let cmp = self.descriptor.comparator.as_ref();
        // Never split the versions of one user key across output files.
        if let Some(largest) = out.meta.largest_user_key() {
            if cmp.compare(largest, next_user_key) == Ordering::Equal {
                return false;
            }
        }
        if out.builder.estimated_size() >= self.descriptor.max_output_file_size {
            return true;
        }
        if self.descriptor.output_level == 0 || self.descriptor.per_key_placement {
            return false;
        }
        while self.grandparent_index < self.grandparents.len() {
            let grandparent = &self.grandparents[self.grandparent_index];
            match grandparent.largest_user_key() {
                Some(largest) if cmp.compare(largest, next_user_key) == Ordering::Less => {
                    self.overlapped_bytes += grandparent.file_size;
                    self.grandparent_index += 1;
                }
                _ => break,
            }
        }
        self.overlapped_bytes > self.descriptor.max_overlap_bytes
    }

    /// Finishes the open output: places the range tombstones covering
    /// `[range_del_lower, next_key or slice end)`, refines metadata, writes
    /// the footer, syncs, and applies the empty-file and space-limit rules.
    pub(crate) fn finish_current(
        &mut self,
        next_key: Option<&[u8]>,
        range_del_agg: &CompactionRangeDelAggregator,
        iter_stats: &mut CompactionIterationStats,
    ) -> Result<(), StrataError> {
        let Some(mut out) = self.current.take() else {
            return Ok(());
        };

        let lower = self.range_del_lower.clone();
        let upper = match next_key {
            Some(k) => Some(Bytes::copy_from_slice(k)),
            None => self.slice_end.clone(),
        };
        let spans = range_del_agg.spans_for_output(
            lower.as_deref(),
            upper.as_deref(),
            self.bottommost_level,
            &mut iter_stats.num_range_del_drop_obsolete,
        );
        for t in spans {
            let span_smallest = InternalKey::new(t.start.clone(), t.seq, ValueKind::RangeDelete);
            let replace_smallest = match &out.meta.smallest {
                None => true,
                Some(cur) => self.icmp.compare(&span_smallest, cur) == Ordering::Less,
            };
            if replace_smallest {
                out.meta.smallest = Some(span_smallest);
            }
            // The end key is exclusive; the max-sequence sentinel marks it
            // as a boundary, not a real record.
            let span_largest =
                InternalKey::new(t.end.clone(), MAX_SEQUENCE, ValueKind::RangeDelete);
            let replace_largest = match &out.meta.largest {
                None => true,
                Some(cur) => {
                    self.descriptor
                        .comparator
                        .compare(&span_largest.user_key, &cur.user_key)
                        == Ordering::Greater
                }
            };
            if replace_largest {
                out.meta.largest = Some(span_largest);
            }
            out.meta.smallest_seq = out.meta.smallest_seq.min(t.seq);
            out.meta.largest_seq = out.meta.largest_seq.max(t.seq);
            out.meta.num_range_deletions += 1;
            out.builder.add_range_tombstone(t);
        }
        self.range_del_lower = upper;

        let file_number = out.meta.file_number;
        let info = TableFileCreationInfo {
            column_family: self.descriptor.column_family.clone(),
            file_path: self.store.table_path(file_number),
            file_number,
            job_id: self.job_id,
            file_size: 0,
        };

        if out.meta.num_entries == 0 && out.meta.num_range_deletions == 0 {
            // Nothing survived into this file; do not install an empty SST.
            out.builder.abandon();
            if let Err(e) = self.store.delete_table(file_number) {
                warn!(
                    "[{}] [JOB {}] unable to remove empty output table #{}: {}",
                    self.descriptor.column_family, self.job_id, file_number, e
                );
            }
            self.log_buffer.lock().add(format!(
                "[{}] [JOB {}] table #{} was empty and was not kept",
                self.descriptor.column_family, self.job_id, file_number
            ));
            for listener in &self.options.listeners {
                listener.on_table_file_creation_finished(&info, &Ok(()));
            }
            return Ok(());
        }

        let result = out.builder.finish();
        let table_info = match result {
            Ok(table_info) => table_info,
            Err(e) => {
                for listener in &self.options.listeners {
                    listener.on_table_file_creation_finished(&info, &Err(e.clone()));
                }
                return Err(e);
            }
        };
        out.meta.file_size = table_info.file_size;
        out.meta.file_checksum = table_info.checksum;

        // The exact smallest/largest keys give a tighter oldest-ancestor
        // time than the slice-wide estimate taken at open.
        if let (Some(smallest), Some(largest)) =
            (out.meta.smallest_user_key(), out.meta.largest_user_key())
        {
            if let Some(refined) = self
                .descriptor
                .min_input_oldest_ancester_time(Some(smallest), Some(largest))
            {
                out.meta.oldest_ancester_time = refined;
            }
        }

        {
            let registry_guard = self
                .descriptor
                .lifetime_registry
                .as_ref()
                .map(|registry| registry.lock());
            let mut log_buffer = self.log_buffer.lock();
            log_output_file_priority(
                &self.descriptor.input_version,
                registry_guard.as_deref(),
                &self.descriptor.comparator,
                self.descriptor.output_level,
                &out.meta,
                &mut log_buffer,
            );
            log_buffer.add(format!(
                "[{}] [JOB {}] generated table #{}: {} keys, {} bytes, temperature {:?}",
                self.descriptor.column_family,
                self.job_id,
                file_number,
                out.meta.num_entries,
                out.meta.file_size,
                out.meta.temperature,
            ));
        }

        let info = TableFileCreationInfo {
            file_size: out.meta.file_size,
            ..info
        };
        for listener in &self.options.listeners {
            listener.on_table_file_creation_finished(&info, &Ok(()));
        }

        let total_added = self.store.add_written_bytes(out.meta.file_size);
        self.outputs.push(FinishedOutput {
            meta: out.meta,
            validator: out.validator.digest(),
        });

        if let Some(limit) = self.options.max_allowed_space {
            if total_added > limit {
                return Err(StrataError::SpaceLimit {
                    msg: format!("{} bytes added exceeds limit {}", total_added, limit),
                });
            }
        }
        Ok(())
    }

    /// Closes the slice: finishes the open output, or opens one if range
    /// tombstones still cover the tail window and no file is open.
    pub(crate) fn finish_slice(
        &mut self,
        range_del_agg: &CompactionRangeDelAggregator,
        iter_stats: &mut CompactionIterationStats,
    ) -> Result<(), StrataError> {
        if self.current.is_some() {
            return self.finish_current(None, range_del_agg, iter_stats);
        }
        let mut scratch = 0u64;
        let pending = range_del_agg.spans_for_output(
            self.range_del_lower.as_deref(),
            self.slice_end.as_deref(),
            self.bottommost_level,
            &mut scratch,
        );
        if pending.is_empty() {
            return Ok(());
        }
        self.open_output()?;
        self.finish_current(None, range_del_agg, iter_stats)
    }

    /// Drops the open output after a failure, leaving the partial file to
    /// the obsolete-file collector.
    pub(crate) fn abandon_current(&mut self) {
        if let Some(out) = self.current.take() {
            out.builder.abandon();
        }
    }
}
