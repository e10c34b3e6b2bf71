use std::sync::Arc;

use crate::comparator::UserComparator;
use crate::file_metadata::FileMetadata;
use crate::log_buffer::LogBuffer;
use crate::version::Version;

/// Expected lifetime of an output file, passed to the filesystem as a write
/// hint. Deeper levels are rewritten less often and live longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteLifetimeHint {
    #[default]
    NotSet,
    Short,
    Medium,
    Long,
    Extreme,
}

impl WriteLifetimeHint {
    /// Hint for every output of a compaction into `output_level`. The level
    /// is taken directly; callers never recover it from the hint.
    pub fn for_output_level(output_level: usize) -> Self {
        match output_level {
            0 | 1 => WriteLifetimeHint::Medium,
            2 => WriteLifetimeHint::Long,
            _ => WriteLifetimeHint::Extreme,
        }
    }
}

/// Per-level sorted file scores plus the round-robin compaction cursor,
/// owned by the store and passed to the engine by reference in the
/// descriptor. Advisory input to the per-file priority index.
#[derive(Debug, Default)]
pub struct LifetimeRegistry {
    levels: Vec<LevelLifetimeState>,
}

#[derive(Debug, Default)]
struct LevelLifetimeState {
    /// File scores for the level, ascending.
    file_scores: Vec<u64>,
    compaction_cursor: usize,
}

impl LifetimeRegistry {
    pub fn new(num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels);
        levels.resize_with(num_levels, LevelLifetimeState::default);
        Self { levels }
    }

    pub fn set_level_scores(&mut self, level: usize, mut scores: Vec<u64>) {
        scores.sort_unstable();
        if let Some(state) = self.levels.get_mut(level) {
            state.file_scores = scores;
        }
    }

    pub fn set_compaction_cursor(&mut self, level: usize, cursor: usize) {
        if let Some(state) = self.levels.get_mut(level) {
            state.compaction_cursor = cursor;
        }
    }

    /// Position of `file_score` in the level's sorted score list, offset by
    /// the compaction cursor and clamped at zero.
    pub fn priority_index(&self, level: usize, file_score: u64) -> usize {
        let Some(state) = self.levels.get(level) else {
            return 0;
        };
        let file_index = state.file_scores.partition_point(|s| *s < file_score);
        file_index.saturating_sub(state.compaction_cursor)
    }
}

/// Logs the advisory lifetime-priority index for one closed output file.
///
/// Applies only to outputs at `0 < L < last non-empty level`: the projected
/// overlap with level `L+1` is summed, scored against the file size, and
/// ranked in the registry. Incorrect results affect performance only.
pub(crate) fn log_output_file_priority(
    version: &Version,
    registry: Option<&LifetimeRegistry>,
    cmp: &Arc<dyn UserComparator>,
    output_level: usize,
    meta: &FileMetadata,
    log_buffer: &mut LogBuffer,
) {
    if output_level == 0 || output_level + 1 >= version.num_non_empty_levels() {
        return;
    }
    let (Some(smallest), Some(largest)) = (meta.smallest_user_key(), meta.largest_user_key())
    else {
        return;
    };
    let overlap: Vec<_> =
        version.overlapping_files(output_level + 1, Some(smallest), Some(largest), cmp);
    let overlapping_bytes: u64 = overlap.iter().map(|f| f.file_size).sum();
    if overlapping_bytes == 0 || meta.file_size == 0 {
        log_buffer.add(format!(
            "file priority: file #{} level {} priority_index 0 score 0 overlap_files 0",
            meta.file_number, output_level
        ));
        return;
    }
    let file_score = overlapping_bytes * 1024 / meta.file_size + 50000;
    let priority_index = registry
        .map(|r| r.priority_index(output_level, file_score))
        .unwrap_or(0);
    log_buffer.add(format!(
        "file priority: file #{} level {} priority_index {} score {} size {} overlap_files {}",
        meta.file_number,
        output_level,
        priority_index,
        file_score,
        meta.file_size,
        overlap.len()
    ));
    for overlapped in &overlap {
        log_buffer.add(format!(
            "file #{} overlaps next-level file #{}",
            meta.file_number, overlapped.file_number
        ));
    }
}
