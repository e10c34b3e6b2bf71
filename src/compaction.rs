use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::comparator::UserComparator;
use crate::compaction_filter::CompactionFilterSupplier;
use crate::file_metadata::{FileMetadata, Temperature};
use crate::filesystem::IoPriority;
use crate::merge_operator::MergeOperatorType;
use crate::types::MAX_SEQUENCE;
use crate::version::Version;
use crate::write_hint::LifetimeRegistry;

/// Why the policy chose this compaction; logged with the start event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionReason {
    #[default]
    Unknown,
    LevelL0FilesNum,
    LevelMaxLevelSize,
    UniversalSizeRatio,
    ManualCompaction,
    FilesMarkedForCompaction,
    BottommostFiles,
    Ttl,
    PeriodicCompaction,
    RoundRobinTtl,
}

impl CompactionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionReason::Unknown => "Unknown",
            CompactionReason::LevelL0FilesNum => "LevelL0FilesNum",
            CompactionReason::LevelMaxLevelSize => "LevelMaxLevelSize",
            CompactionReason::UniversalSizeRatio => "UniversalSizeRatio",
            CompactionReason::ManualCompaction => "ManualCompaction",
            CompactionReason::FilesMarkedForCompaction => "FilesMarkedForCompaction",
            CompactionReason::BottommostFiles => "BottommostFiles",
            CompactionReason::Ttl => "Ttl",
            CompactionReason::PeriodicCompaction => "PeriodicCompaction",
            CompactionReason::RoundRobinTtl => "RoundRobinTtl",
        }
    }
}

/// Compression tag recorded in outputs, stats, and the finish event. The
/// table format is opaque to the engine; the tag parameterizes its builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionKind {
    #[default]
    NoCompression,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::NoCompression => "NoCompression",
            CompressionKind::Snappy => "Snappy",
            CompressionKind::Lz4 => "LZ4",
            CompressionKind::Zstd => "ZSTD",
        }
    }
}

/// Blob sidecar policy for the output level.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobConfig {
    pub enabled: bool,
    /// Blob files are only produced for outputs at or below this level.
    pub starting_level: usize,
    /// Values at least this large move to the sidecar.
    pub min_value_size: usize,
}

/// One input level and its participating files, ordered by key for levels
/// above zero.
#[derive(Debug, Clone)]
pub struct CompactionInputLevel {
    pub level: usize,
    pub files: Vec<Arc<FileMetadata>>,
}

/// Immutable description of one compaction, built by the external policy and
/// handed to the engine. Workers share it read-only.
pub struct CompactionDescriptor {
    pub column_family: String,
    /// Input files grouped by source level, start level first.
    pub inputs: Vec<CompactionInputLevel>,
    pub output_level: usize,
    /// Target size of each output file.
    pub max_output_file_size: u64,
    /// Grandparent-overlap bound that cuts an output early so future
    /// compactions of it stay affordable.
    pub max_overlap_bytes: u64,
    pub comparator: Arc<dyn UserComparator>,
    pub merge_operator: Option<MergeOperatorType>,
    pub compaction_filter: Option<Arc<dyn CompactionFilterSupplier>>,
    /// Live snapshot sequences, ascending.
    pub snapshots: Vec<u64>,
    pub earliest_write_conflict: u64,
    pub bottommost_level: bool,
    pub is_manual_compaction: bool,
    pub per_key_placement: bool,
    pub max_subcompactions: usize,
    pub rate_priority: IoPriority,
    /// History below this user timestamp is trimmed from the inputs.
    pub trim_ts: Option<Bytes>,
    pub tolerate_corrupt_records: bool,
    pub blob: BlobConfig,
    pub output_temperature: Temperature,
    pub bottommost_temperature: Temperature,
    pub output_compression: CompressionKind,
    /// Advance the round-robin compaction cursor on install.
    pub advance_round_robin_cursor: bool,
    pub lifetime_registry: Option<Arc<Mutex<LifetimeRegistry>>>,
    /// The version the inputs were chosen from; pinned for the whole job.
    pub input_version: Arc<Version>,
    pub reason: CompactionReason,
}

impl CompactionDescriptor {
    pub fn start_level(&self) -> usize {
        self.inputs.first().map(|i| i.level).unwrap_or(0)
    }

    pub fn num_input_files(&self) -> usize {
        self.inputs.iter().map(|i| i.files.len()).sum()
    }

    pub fn total_input_size(&self) -> u64 {
        self.inputs
            .iter()
            .flat_map(|i| i.files.iter())
            .map(|f| f.file_size)
            .sum()
    }

    pub fn earliest_snapshot(&self) -> u64 {
        self.snapshots.first().copied().unwrap_or(MAX_SEQUENCE)
    }

    pub fn blob_output_enabled(&self) -> bool {
        self.blob.enabled && self.output_level >= self.blob.starting_level
    }

    pub fn does_input_reference_blob_files(&self) -> bool {
        self.inputs
            .iter()
            .flat_map(|i| i.files.iter())
            .any(|f| f.oldest_blob_file_number.is_some())
    }

    /// Smallest and largest user keys across every input file.
    pub fn input_user_key_range(&self) -> (Option<Bytes>, Option<Bytes>) {
        let cmp = &self.comparator;
        let mut smallest: Option<Bytes> = None;
        let mut largest: Option<Bytes> = None;
        for f in self.inputs.iter().flat_map(|i| i.files.iter()) {
            if let Some(k) = f.smallest.as_ref().map(|k| k.user_key.clone()) {
                smallest = Some(match smallest.take() {
                    None => k,
                    Some(cur) => {
                        if cmp.compare(&k, &cur) == std::cmp::Ordering::Less {
                            k
                        } else {
                            cur
                        }
                    }
                });
            }
            if let Some(k) = f.largest.as_ref().map(|k| k.user_key.clone()) {
                largest = Some(match largest.take() {
                    None => k,
                    Some(cur) => {
                        if cmp.compare(&k, &cur) == std::cmp::Ordering::Greater {
                            k
                        } else {
                            cur
                        }
                    }
                });
            }
        }
        (smallest, largest)
    }

    /// Oldest ancestor time over the input files intersecting
    /// `[smallest, largest]`; refines the metadata of each output file.
    pub fn min_input_oldest_ancester_time(
        &self,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> Option<u64> {
        let cmp = &self.comparator;
        self.inputs
            .iter()
            .flat_map(|i| i.files.iter())
            .filter(|f| {
                let (Some(file_smallest), Some(file_largest)) =
                    (f.smallest_user_key(), f.largest_user_key())
                else {
                    return true;
                };
                if let Some(hi) = largest {
                    if cmp.compare(file_smallest, hi) == std::cmp::Ordering::Greater {
                        return false;
                    }
                }
                if let Some(lo) = smallest {
                    if cmp.compare(file_largest, lo) == std::cmp::Ordering::Less {
                        return false;
                    }
                }
                true
            })
            .map(|f| f.oldest_ancester_time)
            .min()
    }

    /// Files at the grandparent level (output level + 1) overlapping the
    /// inputs; drives the overlap-based output cut.
    pub fn grandparents(&self) -> Vec<Arc<FileMetadata>> {
        let grandparent_level = self.output_level + 1;
        if grandparent_level >= self.input_version.num_levels() {
            return Vec::new();
        }
        let (smallest, largest) = self.input_user_key_range();
        self.input_version.overlapping_files(
            grandparent_level,
            smallest.as_deref(),
            largest.as_deref(),
            &self.comparator,
        )
    }

    /// Sub-compactions require splitting on bare user keys; with
    /// user-defined timestamps the split points would need timestamp
    /// stripping, so parallel slices are disabled.
    pub fn should_form_subcompactions(&self) -> bool {
        self.max_subcompactions > 1
            && self.comparator.timestamp_size() == 0
            && self.output_level > 0
    }

    /// Summary of the shape of the inputs, e.g. `2@0 + 3@1 files`.
    pub fn input_level_summary(&self) -> String {
        let parts: Vec<String> = self
            .inputs
            .iter()
            .map(|i| format!("{}@{}", i.files.len(), i.level))
            .collect();
        format!("{} files", parts.join(" + "))
    }
}
