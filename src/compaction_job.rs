use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use log::info;
use parking_lot::Mutex;
use tracing::instrument;

use crate::blob::{BlobCountingIterator, BlobFileBuilder, BlobGarbage};
use crate::boundary::compute_subcompaction_boundaries;
use crate::clipping_iterator::ClippingIterator;
use crate::compaction::CompactionDescriptor;
use crate::compaction_filter::CompactionJobContext;
use crate::compaction_iterator::CompactionIterator;
use crate::config::CompactionJobOptions;
use crate::error::StrataError;
use crate::file_metadata::FileMetadata;
use crate::filesystem::{DirFsyncReason, WriteFileOptions};
use crate::history_trimming_iterator::HistoryTrimmingIterator;
use crate::iter::InternalIterator;
use crate::listener::SubcompactionJobInfo;
use crate::log_buffer::LogBuffer;
use crate::output_validator::{OutputValidator, ValidatorDigest};
use crate::output_writer::CompactionOutputs;
use crate::range_tombstones::CompactionRangeDelAggregator;
use crate::stats::{CompactionIterationStats, CompactionJobStats};
use crate::subcompaction::SubcompactionState;
use crate::tablestore::TableStore;
use crate::version::{make_input_iterator, FileNumberAllocator, VersionEdit, VersionSet};
use crate::write_hint::WriteLifetimeHint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Prepared,
    Ran,
    Installed,
    Failed,
    Done,
}

/// Runs one compaction end to end: `prepare` plans the slices, `run`
/// executes and verifies them on parallel threads, `install` commits the
/// version edit under the database mutex, `cleanup` drops the job state.
///
/// Any step failing moves the job to `Failed`; a failed job installs
/// nothing and leaves produced files to the obsolete-file collector.
pub struct CompactionJob {
    job_id: u32,
    descriptor: Arc<CompactionDescriptor>,
    options: Arc<CompactionJobOptions>,
    versions: Arc<Mutex<VersionSet>>,
    file_numbers: Arc<FileNumberAllocator>,
    store: Arc<TableStore>,
    shutting_down: Arc<AtomicBool>,
    manual_compaction_canceled: Arc<AtomicBool>,
    column_family_dropped: Arc<AtomicBool>,
    log_buffer: Mutex<LogBuffer>,

    write_hint: WriteLifetimeHint,
    bottommost_level: bool,
    boundaries: Vec<Bytes>,
    grandparents: Vec<Arc<FileMetadata>>,
    sub_states: Vec<SubcompactionState>,
    job_stats: CompactionJobStats,
    status: Option<StrataError>,
    io_status: Option<StrataError>,
    state: JobState,
}

impl CompactionJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: u32,
        descriptor: Arc<CompactionDescriptor>,
        options: Arc<CompactionJobOptions>,
        versions: Arc<Mutex<VersionSet>>,
        store: Arc<TableStore>,
        shutting_down: Arc<AtomicBool>,
        manual_compaction_canceled: Arc<AtomicBool>,
        column_family_dropped: Arc<AtomicBool>,
    ) -> Self {
        let file_numbers = versions.lock().file_numbers();
        Self {
            job_id,
            descriptor,
            options,
            versions,
            file_numbers,
            store,
            shutting_down,
            manual_compaction_canceled,
            column_family_dropped,
            log_buffer: Mutex::new(LogBuffer::new()),
            write_hint: WriteLifetimeHint::NotSet,
            bottommost_level: false,
            boundaries: Vec::new(),
            grandparents: Vec::new(),
            sub_states: Vec::new(),
            job_stats: CompactionJobStats::default(),
            status: None,
            io_status: None,
            state: JobState::Created,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn status(&self) -> Option<&StrataError> {
        self.status.as_ref()
    }

    pub fn io_status(&self) -> Option<&StrataError> {
        self.io_status.as_ref()
    }

    pub fn stats(&self) -> &CompactionJobStats {
        &self.job_stats
    }

    pub fn outputs(&self) -> impl Iterator<Item = &FileMetadata> {
        self.sub_states
            .iter()
            .flat_map(|s| s.outputs.iter().map(|o| &o.meta))
    }

    /// Plans the slice boundaries and creates all sub-compaction state. The
    /// version view was pinned into the descriptor under the database
    /// mutex; the approximate-size queries below run without it.
    pub fn prepare(&mut self) -> Result<(), StrataError> {
        debug_assert_eq!(self.state, JobState::Created);
        if self.descriptor.num_input_files() == 0 {
            return Err(StrataError::invalid_argument(
                "compaction descriptor has no input files",
            ));
        }
        self.write_hint = WriteLifetimeHint::for_output_level(self.descriptor.output_level);
        self.bottommost_level = self.descriptor.bottommost_level;
        self.grandparents = self.descriptor.grandparents();

        if self.descriptor.should_form_subcompactions() {
            self.boundaries =
                compute_subcompaction_boundaries(&self.descriptor, &self.descriptor.input_version);
        }
        let meters_blob_garbage = self.descriptor.does_input_reference_blob_files();
        let num_slices = self.boundaries.len() + 1;
        let mut states = Vec::with_capacity(num_slices);
        for i in 0..num_slices {
            let start = (i > 0).then(|| self.boundaries[i - 1].clone());
            let end = (i < self.boundaries.len()).then(|| self.boundaries[i].clone());
            states.push(SubcompactionState::new(
                i as u32,
                start,
                end,
                meters_blob_garbage,
            ));
        }
        self.sub_states = states;
        self.state = JobState::Prepared;
        Ok(())
    }

    /// Executes every slice (slice 0 on the calling thread, the rest on
    /// worker threads), syncs the output directories, and verifies the
    /// outputs with a parallel verifier pool.
    #[instrument(level = "debug", skip_all, fields(job_id = self.job_id))]
    pub fn run(&mut self) -> Result<(), StrataError> {
        debug_assert_eq!(self.state, JobState::Prepared);
        self.log_buffer.lock().flush();
        self.log_compaction_start();

        let start_micros = self.options.clock.now_micros();
        let mut states = std::mem::take(&mut self.sub_states);
        {
            let job = &*self;
            std::thread::scope(|scope| {
                let mut iter = states.iter_mut();
                let first = iter.next();
                let handles: Vec<_> = iter
                    .map(|state| scope.spawn(move || job.process_key_value_compaction(state)))
                    .collect();
                if let Some(first) = first {
                    job.process_key_value_compaction(first);
                }
                for handle in handles {
                    handle.join().expect("sub-compaction worker panicked");
                }
            });
        }
        self.job_stats.micros = self
            .options
            .clock
            .now_micros()
            .saturating_sub(start_micros);

        let mut status: Option<StrataError> = None;
        let mut io_status: Option<StrataError> = None;
        for state in &states {
            self.job_stats.cpu_micros += state.job_stats.cpu_micros;
            if status.is_none() {
                status = state.status.clone();
                io_status = state.io_status.clone();
            }
        }
        if self.io_status.is_none() {
            self.io_status = io_status;
        }

        let wrote_blob_files = states.iter().any(|s| !s.blob_additions.is_empty());
        if status.is_none() {
            if let Err(e) = self.store.sync_table_dir(DirFsyncReason::NewFileSynced) {
                self.io_status.get_or_insert(e.clone());
                status = Some(e);
            }
        }
        if status.is_none() && wrote_blob_files && self.store.has_distinct_blob_dir() {
            if let Err(e) = self.store.sync_blob_dir(DirFsyncReason::NewFileSynced) {
                self.io_status.get_or_insert(e.clone());
                status = Some(e);
            }
        }

        if status.is_none() {
            self.verify_outputs(&mut states);
            for state in &states {
                if let Some(e) = &state.status {
                    status = Some(e.clone());
                    break;
                }
            }
        }

        self.update_compaction_stats(&states);
        self.sub_states = states;
        self.status = status.clone();
        match status {
            None => {
                self.state = JobState::Ran;
                Ok(())
            }
            Some(e) => {
                self.state = JobState::Failed;
                Err(e)
            }
        }
    }

    /// Commits the result under the database mutex: one version edit removes
    /// every input and adds every output, atomically. Skipped when any
    /// earlier step failed.
    pub fn install(&mut self) -> Result<(), StrataError> {
        if let Some(e) = self.status.clone() {
            self.state = JobState::Failed;
            self.log_compaction_finish(None);
            return Err(e);
        }
        debug_assert_eq!(self.state, JobState::Ran);

        let versions = self.versions.clone();
        let result = {
            let mut guard = versions.lock();
            let result = self.install_compaction_results(&mut guard);
            if let Some(io) = guard.io_status() {
                self.io_status = Some(io.clone());
            }
            result
        };
        match &result {
            Ok(()) => self.state = JobState::Installed,
            Err(e) => {
                self.status = Some(e.clone());
                self.state = JobState::Failed;
            }
        }
        let summary = versions.lock().current().level_summary();
        self.log_compaction_finish(Some(summary));
        result
    }

    /// Drops all sub-compaction state and releases the pinned input version.
    pub fn cleanup(&mut self) {
        self.sub_states.clear();
        self.boundaries.clear();
        self.grandparents.clear();
        self.log_buffer.lock().flush();
        self.state = JobState::Done;
    }

    fn install_compaction_results(
        &self,
        versions: &mut VersionSet,
    ) -> Result<(), StrataError> {
        let d = &self.descriptor;
        self.log_buffer.lock().add(format!(
            "[{}] [JOB {}] compacted {} => {} bytes",
            d.column_family,
            self.job_id,
            d.input_level_summary(),
            self.job_stats.bytes_written,
        ));

        let mut edit = VersionEdit::default();
        for input in &d.inputs {
            for f in &input.files {
                edit.delete_file(input.level, f.file_number);
            }
        }
        for state in &self.sub_states {
            for output in &state.outputs {
                edit.add_file(d.output_level, Arc::new(output.meta.clone()));
            }
            for blob in &state.blob_additions {
                edit.add_blob_file(Arc::new(blob.clone()));
            }
        }

        let mut blob_totals: std::collections::BTreeMap<u64, (u64, u64)> = Default::default();
        for state in &self.sub_states {
            if let Some(meter) = &state.blob_garbage {
                for garbage in meter.lock().garbage() {
                    let slot = blob_totals.entry(garbage.blob_file_number).or_default();
                    slot.0 += garbage.count;
                    slot.1 += garbage.bytes;
                }
            }
        }
        for (blob_file_number, (count, bytes)) in blob_totals {
            edit.add_blob_file_garbage(BlobGarbage {
                blob_file_number,
                count,
                bytes,
            });
        }

        if d.advance_round_robin_cursor && d.start_level() > 0 {
            let start_input = &d.inputs[0];
            if let Some(cursor) = start_input
                .files
                .last()
                .and_then(|f| f.largest_user_key())
            {
                edit.set_compaction_cursor(d.start_level(), Bytes::copy_from_slice(cursor));
            }
        }

        versions.log_and_apply(edit)
    }

    /// The steady-state loop of one `[start, end)` slice.
    fn process_key_value_compaction(&self, sub: &mut SubcompactionState) {
        let cpu_start = self.options.clock.cpu_micros();
        self.notify_subcompaction_begin(sub);
        if let Err(e) = self.run_subcompaction(sub) {
            if e.is_io_error() {
                sub.set_io_status_if_ok(e.clone());
            }
            sub.set_status_if_ok(e);
        }
        sub.job_stats.cpu_micros = self
            .options
            .clock
            .cpu_micros()
            .saturating_sub(cpu_start);
        self.notify_subcompaction_completed(sub);
    }

    fn run_subcompaction(&self, sub: &mut SubcompactionState) -> Result<(), StrataError> {
        let d = &*self.descriptor;

        let filter = match &d.compaction_filter {
            Some(supplier) => {
                let context = CompactionJobContext {
                    job_id: self.job_id,
                    output_level: d.output_level,
                    bottommost_level: self.bottommost_level,
                    is_manual_compaction: d.is_manual_compaction,
                };
                Some(supplier.create_compaction_filter(&context)?)
            }
            None => None,
        };

        let mut range_del_agg =
            CompactionRangeDelAggregator::new(d.comparator.clone(), d.snapshots.clone());
        let raw_input = make_input_iterator(
            &d.inputs,
            d.comparator.clone(),
            &self.store,
            &mut range_del_agg,
            sub.start.as_deref(),
            sub.end.as_deref(),
        )?;
        let mut input: Box<dyn InternalIterator> = if sub.start.is_some() || sub.end.is_some() {
            Box::new(ClippingIterator::new(
                raw_input,
                d.comparator.clone(),
                sub.start.clone(),
                sub.end.clone(),
            ))
        } else {
            raw_input
        };
        if let Some(meter) = &sub.blob_garbage {
            input = Box::new(BlobCountingIterator::new(input, meter.clone()));
        }
        if d.comparator.timestamp_size() > 0 {
            if let Some(trim_ts) = &d.trim_ts {
                input = Box::new(HistoryTrimmingIterator::new(
                    input,
                    d.comparator.clone(),
                    trim_ts.clone(),
                ));
            }
        }

        let blob_builder = d.blob_output_enabled().then(|| {
            BlobFileBuilder::new(
                self.store.clone(),
                self.file_numbers.clone(),
                WriteFileOptions {
                    temperature: d.output_temperature,
                    lifetime_hint: self.write_hint,
                    io_priority: d.rate_priority,
                },
            )
        });

        let mut c_iter = CompactionIterator::new(
            input,
            d.comparator.clone(),
            d.snapshots.clone(),
            d.earliest_write_conflict,
            d.merge_operator.clone(),
            filter,
            d.start_level(),
            &range_del_agg,
            blob_builder,
            d.blob.min_value_size,
            self.bottommost_level,
            d.tolerate_corrupt_records,
            self.options.enforce_single_del_contracts,
            self.shutting_down.clone(),
            self.manual_compaction_canceled.clone(),
        )?;

        let mut outputs = CompactionOutputs::new(
            d,
            &self.options,
            &self.store,
            &self.file_numbers,
            &self.log_buffer,
            sub.blob_garbage.clone(),
            self.job_id,
            self.write_hint,
            self.bottommost_level,
            sub.start.clone(),
            sub.end.clone(),
            self.grandparents.clone(),
        );

        let mut flush_stats = CompactionIterationStats::default();
        let mut status: Result<(), StrataError> = Ok(());
        loop {
            if self.column_family_dropped.load(AtomicOrdering::Relaxed) {
                status = Err(StrataError::ColumnFamilyDropped);
                break;
            }
            match c_iter.next_entry() {
                Ok(Some(entry)) => {
                    if outputs.has_open_output()
                        && outputs.should_cut_before(&entry.key.user_key)
                    {
                        if let Err(e) = outputs.finish_current(
                            Some(entry.key.user_key.as_ref()),
                            &range_del_agg,
                            &mut flush_stats,
                        ) {
                            status = Err(e);
                            break;
                        }
                    }
                    if let Err(e) = outputs.add(entry) {
                        status = Err(e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    status = Err(e);
                    break;
                }
            }
        }

        // The tombstone flush still runs after an error so tombstones
        // covering the slice tail are persisted when possible.
        let flush_result = outputs.finish_slice(&range_del_agg, &mut flush_stats);
        if status.is_ok() {
            status = flush_result;
        }
        outputs.abandon_current();

        if let Some(builder) = c_iter.take_blob_builder() {
            if status.is_ok() {
                match builder.finish() {
                    Ok(Some(meta)) => sub.blob_additions.push(meta),
                    Ok(None) => {}
                    Err(e) => status = Err(e),
                }
            } else {
                builder.abandon();
            }
        }

        let mut iter_stats = c_iter.stats().clone();
        iter_stats.num_range_del_drop_obsolete += flush_stats.num_range_del_drop_obsolete;
        if let Some(meter) = &sub.blob_garbage {
            let meter = meter.lock();
            iter_stats.num_blobs_read = meter.total_in_count();
            iter_stats.total_blob_bytes_read = meter.total_in_bytes();
        }
        sub.iter_stats = iter_stats;
        drop(c_iter);
        sub.outputs = outputs.into_outputs();
        status
    }

    /// Re-opens every output through the read path and walks it end to end;
    /// with paranoid checks on, the recomputed validator must match the one
    /// captured at build time.
    fn verify_outputs(&self, states: &mut [SubcompactionState]) {
        let files: Vec<(u64, ValidatorDigest)> = states
            .iter()
            .flat_map(|s| {
                s.outputs
                    .iter()
                    .map(|o| (o.meta.file_number, o.validator.clone()))
            })
            .collect();
        if files.is_empty() {
            return;
        }
        let next_file_idx = AtomicUsize::new(0);
        let num_threads = states.len();
        let errors: Vec<Option<StrataError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (1..num_threads)
                .map(|_| scope.spawn(|| self.verify_some(&files, &next_file_idx)))
                .collect();
            let mut errors = vec![self.verify_some(&files, &next_file_idx)];
            for handle in handles {
                errors.push(handle.join().expect("verifier thread panicked"));
            }
            errors
        });
        for (state, error) in states.iter_mut().zip(errors) {
            if let Some(error) = error {
                state.set_status_if_ok(error);
            }
        }
    }

    fn verify_some(
        &self,
        files: &[(u64, ValidatorDigest)],
        next_file_idx: &AtomicUsize,
    ) -> Option<StrataError> {
        loop {
            let idx = next_file_idx.fetch_add(1, AtomicOrdering::SeqCst);
            if idx >= files.len() {
                return None;
            }
            let (file_number, expected) = &files[idx];
            if let Err(e) = self.verify_one(*file_number, expected) {
                return Some(e);
            }
        }
    }

    fn verify_one(
        &self,
        file_number: u64,
        expected: &ValidatorDigest,
    ) -> Result<(), StrataError> {
        // No compaction read hints here: the blocks this pass loads are
        // meant to serve upcoming user reads.
        let reader = self.store.open_table(file_number)?;
        let mut validator = OutputValidator::new(crate::comparator::InternalKeyComparator::new(
            self.descriptor.comparator.clone(),
        ));
        let mut iter = reader.iter(self.descriptor.comparator.clone());
        while let Some(entry) = iter.next_entry()? {
            validator.add(&entry)?;
        }
        if self.options.paranoid_file_checks && validator.digest() != *expected {
            return Err(StrataError::corruption("paranoid checksums do not match"));
        }
        Ok(())
    }

    fn update_compaction_stats(&mut self, states: &[SubcompactionState]) {
        let d = &self.descriptor;
        let stats = &mut self.job_stats;
        for input in &d.inputs {
            let files = input.files.len() as u64;
            let bytes: u64 = input.files.iter().map(|f| f.file_size).sum();
            stats.num_input_records += input.files.iter().map(|f| f.num_entries).sum::<u64>();
            stats.num_input_files += files;
            if input.level == d.output_level {
                stats.num_input_files_at_output_level += files;
                stats.bytes_read_output_level += bytes;
            } else {
                stats.bytes_read_non_output_levels += bytes;
            }
        }
        for state in states {
            stats.add_iteration_stats(&state.iter_stats);
            stats.num_output_files += state.outputs.len() as u64;
            stats.num_output_records += state.total_output_records();
            stats.bytes_written += state.total_output_bytes();
            stats.num_output_files_blob += state.blob_additions.len() as u64;
            stats.bytes_written_blob += state
                .blob_additions
                .iter()
                .map(|b| b.total_blob_bytes)
                .sum::<u64>();
        }
        stats.num_subcompactions = states.len() as u64;
        stats.is_manual_compaction = d.is_manual_compaction;

        let cmp = &d.comparator;
        let smallest = states
            .iter()
            .flat_map(|s| s.outputs.iter())
            .filter_map(|o| o.meta.smallest_user_key())
            .min_by(|a, b| cmp.compare(a, b));
        if let Some(key) = smallest {
            let len = key.len().min(CompactionJobStats::MAX_PREFIX_LENGTH);
            stats.smallest_output_key_prefix = key[..len].to_vec();
        }
        let largest = states
            .iter()
            .flat_map(|s| s.outputs.iter())
            .filter_map(|o| o.meta.largest_user_key())
            .max_by(|a, b| cmp.compare(a, b));
        if let Some(key) = largest {
            let len = key.len().min(CompactionJobStats::MAX_PREFIX_LENGTH);
            stats.largest_output_key_prefix = key[..len].to_vec();
        }
    }

    fn notify_subcompaction_begin(&self, sub: &mut SubcompactionState) {
        if self.options.listeners.is_empty() {
            return;
        }
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }
        if self.descriptor.is_manual_compaction
            && self.manual_compaction_canceled.load(AtomicOrdering::Acquire)
        {
            return;
        }
        sub.notify_on_completion = true;
        let info = self.subcompaction_info(sub);
        for listener in &self.options.listeners {
            listener.on_subcompaction_begin(&info);
        }
    }

    fn notify_subcompaction_completed(&self, sub: &SubcompactionState) {
        if self.options.listeners.is_empty() || !sub.notify_on_completion {
            return;
        }
        let info = self.subcompaction_info(sub);
        for listener in &self.options.listeners {
            listener.on_subcompaction_completed(&info);
        }
    }

    fn subcompaction_info(&self, sub: &SubcompactionState) -> SubcompactionJobInfo {
        SubcompactionJobInfo {
            column_family: self.descriptor.column_family.clone(),
            job_id: self.job_id,
            sub_job_id: sub.sub_job_id,
            base_input_level: self.descriptor.start_level(),
            output_level: self.descriptor.output_level,
            status: sub.status.clone(),
        }
    }

    /// Compaction id unique across the process: job id in the high half,
    /// sub-compaction id in the low half.
    pub fn compaction_id(&self, sub: &SubcompactionState) -> u64 {
        (self.job_id as u64) << 32 | sub.sub_job_id as u64
    }

    fn log_compaction_start(&self) {
        let d = &self.descriptor;
        let mut buffer = self.log_buffer.lock();
        buffer.add(format!(
            "[{}] [JOB {}] compacting {}, reason {}",
            d.column_family,
            self.job_id,
            d.input_level_summary(),
            d.reason.as_str(),
        ));
        let mut event = format!(
            "job {} event compaction_started reason {}",
            self.job_id,
            d.reason.as_str()
        );
        for input in &d.inputs {
            let numbers: Vec<String> = input
                .files
                .iter()
                .map(|f| f.file_number.to_string())
                .collect();
            event.push_str(&format!(" files_L{} [{}]", input.level, numbers.join(", ")));
        }
        event.push_str(&format!(" input_data_size {}", d.total_input_size()));
        buffer.add(event);
        buffer.flush();
    }

    fn log_compaction_finish(&self, level_summary: Option<String>) {
        let d = &self.descriptor;
        let stats = &self.job_stats;
        let mut buffer = self.log_buffer.lock();

        let bytes_read_all =
            stats.bytes_read_non_output_levels + stats.bytes_read_output_level + stats.bytes_read_blob;
        let bytes_read_non_output = stats.bytes_read_non_output_levels + stats.bytes_read_blob;
        let bytes_written_all = stats.bytes_written + stats.bytes_written_blob;
        let (read_write_amp, write_amp) = if bytes_read_non_output > 0 {
            (
                (bytes_written_all + bytes_read_all) as f64 / bytes_read_non_output as f64,
                bytes_written_all as f64 / bytes_read_non_output as f64,
            )
        } else {
            (0.0, 0.0)
        };
        let (read_rate, write_rate) = if stats.micros > 0 {
            (
                bytes_read_all as f64 / stats.micros as f64,
                bytes_written_all as f64 / stats.micros as f64,
            )
        } else {
            (0.0, 0.0)
        };
        const MB: f64 = 1048576.0;
        let status_str = match &self.status {
            None => "OK".to_string(),
            Some(e) => e.to_string(),
        };
        buffer.add(format!(
            "[{}] compacted to: {}, MB/sec: {:.1} rd, {:.1} wr, level {}, \
             files in({}, {}) out({} +{} blob) \
             MB in({:.1}, {:.1} +{:.1} blob) out({:.1} +{:.1} blob), \
             read-write-amplify({:.1}) write-amplify({:.1}) {}, records in: {}, \
             records dropped: {} output_compression: {}",
            d.column_family,
            level_summary.unwrap_or_else(|| "(not installed)".to_string()),
            read_rate,
            write_rate,
            d.output_level,
            stats.num_input_files - stats.num_input_files_at_output_level,
            stats.num_input_files_at_output_level,
            stats.num_output_files,
            stats.num_output_files_blob,
            stats.bytes_read_non_output_levels as f64 / MB,
            stats.bytes_read_output_level as f64 / MB,
            stats.bytes_read_blob as f64 / MB,
            stats.bytes_written as f64 / MB,
            stats.bytes_written_blob as f64 / MB,
            read_write_amp,
            write_amp,
            status_str,
            stats.num_input_records,
            stats.num_dropped_records,
            d.output_compression.as_str(),
        ));

        {
            let versions = self.versions.lock();
            let current = versions.current();
            let blob_files = current.blob_files();
            if let (Some(head), Some(tail)) = (
                blob_files.keys().next().copied(),
                blob_files.keys().next_back().copied(),
            ) {
                buffer.add(format!(
                    "[{}] blob file summary: head={}, tail={}",
                    d.column_family, head, tail
                ));
            }
        }

        buffer.add(format!(
            "job {} event compaction_finished compaction_time_micros {} \
             compaction_time_cpu_micros {} output_level {} num_output_files {} \
             total_output_size {} num_input_records {} num_output_records {} \
             num_subcompactions {} output_compression {} \
             num_single_delete_mismatches {} num_single_delete_fallthrough {} \
             lsm_state {}",
            self.job_id,
            stats.micros,
            stats.cpu_micros,
            d.output_level,
            stats.num_output_files,
            stats.bytes_written,
            stats.num_input_records,
            stats.num_output_records,
            stats.num_subcompactions,
            d.output_compression.as_str(),
            stats.num_single_del_mismatch,
            stats.num_single_del_fallthru,
            self.versions.lock().current().level_summary(),
        ));
        buffer.flush();
        info!(
            target: "stratadb::compaction",
            "[{}] [JOB {}] finished with status {}",
            d.column_family, self.job_id, status_str
        );
    }
}
