/// Per-key accounting kept by the compaction iterator of one sub-compaction.
#[derive(Debug, Default, Clone)]
pub struct CompactionIterationStats {
    pub num_input_records: u64,
    pub num_input_deletion_records: u64,
    pub num_input_corrupt_records: u64,
    pub total_input_raw_key_bytes: u64,
    pub total_input_raw_value_bytes: u64,

    /// Dropped by the user compaction filter.
    pub num_record_drop_user: u64,
    /// Dropped because a newer record in the same snapshot stripe exists.
    pub num_record_drop_hidden: u64,
    /// Dropped because nothing below can resurrect it (bottommost deletes,
    /// elided single-delete pairs).
    pub num_record_drop_obsolete: u64,
    /// Dropped because a range tombstone hides it.
    pub num_record_drop_range_del: u64,
    /// Range tombstones dropped at the bottommost level.
    pub num_range_del_drop_obsolete: u64,
    /// Single-delete/put pairs elided without a tombstone surviving.
    pub num_optimized_del_drop_obsolete: u64,

    pub num_single_del_fallthru: u64,
    pub num_single_del_mismatch: u64,

    pub num_blobs_read: u64,
    pub total_blob_bytes_read: u64,
}

impl CompactionIterationStats {
    pub fn num_dropped_records(&self) -> u64 {
        self.num_record_drop_user
            + self.num_record_drop_hidden
            + self.num_record_drop_obsolete
            + self.num_record_drop_range_del
    }
}

/// Aggregated statistics for one compaction job, published after install.
#[derive(Debug, Default, Clone)]
pub struct CompactionJobStats {
    pub micros: u64,
    pub cpu_micros: u64,

    pub num_input_files: u64,
    pub num_input_files_at_output_level: u64,
    pub num_input_records: u64,
    pub bytes_read_non_output_levels: u64,
    pub bytes_read_output_level: u64,
    pub bytes_read_blob: u64,

    pub num_output_files: u64,
    pub num_output_files_blob: u64,
    pub num_output_records: u64,
    pub bytes_written: u64,
    pub bytes_written_blob: u64,

    pub num_dropped_records: u64,
    pub num_corrupt_keys: u64,
    pub num_single_del_fallthru: u64,
    pub num_single_del_mismatch: u64,

    pub num_subcompactions: u64,
    pub is_manual_compaction: bool,
    pub is_full_compaction: bool,

    /// First bytes of the smallest/largest output user keys, for event logs.
    pub smallest_output_key_prefix: Vec<u8>,
    pub largest_output_key_prefix: Vec<u8>,
}

impl CompactionJobStats {
    pub const MAX_PREFIX_LENGTH: usize = 8;

    pub(crate) fn add_iteration_stats(&mut self, it: &CompactionIterationStats) {
        self.num_corrupt_keys += it.num_input_corrupt_records;
        self.num_single_del_fallthru += it.num_single_del_fallthru;
        self.num_single_del_mismatch += it.num_single_del_mismatch;
        self.bytes_read_blob += it.total_blob_bytes_read;
        self.num_dropped_records += it.num_dropped_records();
    }

    pub fn total_input_bytes(&self) -> u64 {
        self.bytes_read_non_output_levels + self.bytes_read_output_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_records_sums_point_drop_causes() {
        let stats = CompactionIterationStats {
            num_record_drop_user: 1,
            num_record_drop_hidden: 2,
            num_record_drop_obsolete: 3,
            num_record_drop_range_del: 4,
            num_range_del_drop_obsolete: 100,
            ..Default::default()
        };
        assert_eq!(stats.num_dropped_records(), 10);
    }
}
