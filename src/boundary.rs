use bytes::Bytes;

use crate::compaction::CompactionDescriptor;
use crate::version::Version;

/// Outputs should end up at least this full relative to the target file
/// size; fewer, fuller slices beat many slivers.
const MIN_FILE_FILL_FRACTION: f64 = 4.0 / 5.0;

/// Computes the user-key boundaries splitting the compaction into disjoint
/// slices `[-inf, b1), [b1, b2), ..., [b_{n-1}, +inf)`.
///
/// Candidate boundaries come from input file endpoints (both endpoints of
/// every L0 file, level-wide endpoints above L0, and the smallest key of
/// every output-level file past the first). Adjacent candidates are weighted
/// by the version's approximate size for the range and grouped greedily so
/// each slice holds roughly `total / slices` bytes. Boundaries are bare user
/// keys so each slice can be compacted independently without breaking sort
/// order at the seam.
pub(crate) fn compute_subcompaction_boundaries(
    descriptor: &CompactionDescriptor,
    version: &Version,
) -> Vec<Bytes> {
    let cmp = &descriptor.comparator;
    let start_level = descriptor.start_level();
    let out_level = descriptor.output_level;

    let mut bounds: Vec<Bytes> = Vec::new();
    for input in &descriptor.inputs {
        if input.files.is_empty() {
            continue;
        }
        if input.level == 0 {
            // L0 files overlap; every endpoint is a candidate seam.
            for f in &input.files {
                if let Some(k) = f.smallest_user_key() {
                    bounds.push(Bytes::copy_from_slice(k));
                }
                if let Some(k) = f.largest_user_key() {
                    bounds.push(Bytes::copy_from_slice(k));
                }
            }
        } else {
            if let Some(k) = input.files.first().and_then(|f| f.smallest_user_key()) {
                bounds.push(Bytes::copy_from_slice(k));
            }
            if let Some(k) = input.files.last().and_then(|f| f.largest_user_key()) {
                bounds.push(Bytes::copy_from_slice(k));
            }
            if input.level == out_level {
                // The output level is range-partitioned with the widest
                // span; file starts are natural seams.
                for f in input.files.iter().skip(1) {
                    if let Some(k) = f.smallest_user_key() {
                        bounds.push(Bytes::copy_from_slice(k));
                    }
                }
            }
        }
    }

    bounds.sort_by(|a, b| cmp.compare(a, b));
    bounds.dedup_by(|a, b| cmp.compare(a, b) == std::cmp::Ordering::Equal);
    if bounds.len() < 2 {
        return Vec::new();
    }

    let mut ranges: Vec<(Bytes, u64)> = Vec::with_capacity(bounds.len() - 1);
    let mut total = 0u64;
    for window in bounds.windows(2) {
        let size = version.approximate_size(cmp, &window[0], &window[1], start_level, out_level);
        total += size;
        ranges.push((window[1].clone(), size));
    }

    let target = descriptor.max_output_file_size.max(1);
    let max_output_files =
        (total as f64 / MIN_FILE_FILL_FRACTION / target as f64).ceil() as usize;
    let mut subcompactions = ranges
        .len()
        .min(descriptor.max_subcompactions)
        .min(max_output_files);

    let mut boundaries = Vec::new();
    if subcompactions > 1 {
        let mean = total as f64 / subcompactions as f64;
        let mut sum = 0u64;
        // Greedily close a slice once it holds at least the mean share; the
        // last slice takes whatever remains.
        for (limit, size) in ranges.iter().take(ranges.len() - 1) {
            sum += size;
            if subcompactions == 1 {
                continue;
            }
            if sum as f64 >= mean {
                boundaries.push(limit.clone());
                subcompactions -= 1;
                sum = 0;
            }
        }
    }
    boundaries
}
