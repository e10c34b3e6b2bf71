use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::comparator::UserComparator;
use crate::types::{InternalKey, MAX_SEQUENCE};

/// A range deletion `[start, end) @ seq` hiding any point `(u, q)` with
/// `start <= u < end` and `q < seq` in the same snapshot stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Bytes,
    pub end: Bytes,
    pub seq: u64,
}

/// Index of the snapshot stripe a sequence falls into: the position of the
/// smallest snapshot >= seq, or `snapshots.len()` for the open-ended stripe
/// above every snapshot. Two sequences are mutually visible iff they share a
/// stripe.
pub(crate) fn snapshot_stripe(snapshots: &[u64], seq: u64) -> usize {
    snapshots.partition_point(|s| *s < seq)
}

pub(crate) fn earliest_snapshot(snapshots: &[u64]) -> u64 {
    snapshots.first().copied().unwrap_or(MAX_SEQUENCE)
}

/// Collects the range deletions of every input file of one sub-compaction and
/// answers point-masking queries and output placement.
pub struct CompactionRangeDelAggregator {
    cmp: Arc<dyn UserComparator>,
    snapshots: Vec<u64>,
    tombstones: Vec<RangeTombstone>,
}

impl CompactionRangeDelAggregator {
    pub fn new(cmp: Arc<dyn UserComparator>, snapshots: Vec<u64>) -> Self {
        debug_assert!(snapshots.windows(2).all(|w| w[0] < w[1]));
        Self {
            cmp,
            snapshots,
            tombstones: Vec::new(),
        }
    }

    pub fn add_tombstone(&mut self, tombstone: RangeTombstone) {
        if self.cmp.compare(&tombstone.start, &tombstone.end) == Ordering::Less {
            self.tombstones.push(tombstone);
        }
    }

    pub fn add_tombstones(&mut self, tombstones: impl IntoIterator<Item = RangeTombstone>) {
        for t in tombstones {
            self.add_tombstone(t);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }

    /// True when a collected tombstone hides the point record. The tombstone
    /// must be newer than the record and no snapshot may separate them,
    /// otherwise the record stays visible to that snapshot.
    pub fn should_delete(&self, key: &InternalKey) -> bool {
        let key_stripe = snapshot_stripe(&self.snapshots, key.seq);
        self.tombstones.iter().any(|t| {
            t.seq > key.seq
                && snapshot_stripe(&self.snapshots, t.seq) == key_stripe
                && self.cmp.compare(&t.start, &key.user_key) != Ordering::Greater
                && self.cmp.compare(&key.user_key, &t.end) == Ordering::Less
        })
    }

    /// Tombstones to persist into the output file covering the user-key
    /// window `[lower, upper)`, clipped to that window and sorted by start
    /// key then sequence descending. At the bottommost level tombstones
    /// already visible to every snapshot have nothing left to hide and are
    /// dropped; `dropped_obsolete` is incremented for each.
    pub fn spans_for_output(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        bottommost_level: bool,
        dropped_obsolete: &mut u64,
    ) -> Vec<RangeTombstone> {
        let earliest = earliest_snapshot(&self.snapshots);
        let mut out: Vec<RangeTombstone> = Vec::new();
        for t in &self.tombstones {
            let start = match lower {
                Some(lo) if self.cmp.compare(&t.start, lo) == Ordering::Less => {
                    Bytes::copy_from_slice(lo)
                }
                _ => t.start.clone(),
            };
            let end = match upper {
                Some(up) if self.cmp.compare(&t.end, up) == Ordering::Greater => {
                    Bytes::copy_from_slice(up)
                }
                _ => t.end.clone(),
            };
            if self.cmp.compare(&start, &end) != Ordering::Less {
                continue;
            }
            if bottommost_level && t.seq <= earliest {
                *dropped_obsolete += 1;
                continue;
            }
            out.push(RangeTombstone {
                start,
                end,
                seq: t.seq,
            });
        }
        out.sort_by(|a, b| {
            self.cmp
                .compare(&a.start, &b.start)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::types::ValueKind;

    fn tombstone(start: &'static [u8], end: &'static [u8], seq: u64) -> RangeTombstone {
        RangeTombstone {
            start: Bytes::from_static(start),
            end: Bytes::from_static(end),
            seq,
        }
    }

    fn key(user_key: &'static [u8], seq: u64) -> InternalKey {
        InternalKey::new(Bytes::from_static(user_key), seq, ValueKind::Put)
    }

    fn agg(snapshots: Vec<u64>) -> CompactionRangeDelAggregator {
        CompactionRangeDelAggregator::new(Arc::new(BytewiseComparator), snapshots)
    }

    #[test]
    fn stripe_assignment() {
        let snapshots = [5, 10];
        assert_eq!(snapshot_stripe(&snapshots, 3), 0);
        assert_eq!(snapshot_stripe(&snapshots, 5), 0);
        assert_eq!(snapshot_stripe(&snapshots, 6), 1);
        assert_eq!(snapshot_stripe(&snapshots, 10), 1);
        assert_eq!(snapshot_stripe(&snapshots, 11), 2);
    }

    #[test]
    fn hides_covered_older_point() {
        let mut a = agg(vec![]);
        a.add_tombstone(tombstone(b"a", b"z", 50));
        assert!(a.should_delete(&key(b"m", 10)));
        assert!(!a.should_delete(&key(b"m", 60)));
        assert!(!a.should_delete(&key(b"z", 10)));
    }

    #[test]
    fn snapshot_boundary_preserves_point() {
        let mut a = agg(vec![20]);
        a.add_tombstone(tombstone(b"a", b"z", 30));
        // Point at seq 10 is visible to snapshot 20; the tombstone at 30 is
        // not, so the point must survive.
        assert!(!a.should_delete(&key(b"m", 10)));
        assert!(a.should_delete(&key(b"m", 25)));
    }

    #[test]
    fn spans_are_clipped_to_the_window() {
        let mut a = agg(vec![]);
        a.add_tombstone(tombstone(b"a", b"z", 50));
        let mut dropped = 0;
        let spans = a.spans_for_output(Some(b"m"), Some(b"t"), false, &mut dropped);
        assert_eq!(spans, vec![tombstone(b"m", b"t", 50)]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn window_outside_span_produces_nothing() {
        let mut a = agg(vec![]);
        a.add_tombstone(tombstone(b"a", b"c", 50));
        let mut dropped = 0;
        assert!(a
            .spans_for_output(Some(b"m"), Some(b"t"), false, &mut dropped)
            .is_empty());
    }

    #[test]
    fn bottommost_drops_tombstones_below_earliest_snapshot() {
        let mut a = agg(vec![40]);
        a.add_tombstone(tombstone(b"a", b"z", 30));
        a.add_tombstone(tombstone(b"a", b"z", 45));
        let mut dropped = 0;
        let spans = a.spans_for_output(None, None, true, &mut dropped);
        assert_eq!(spans, vec![tombstone(b"a", b"z", 45)]);
        assert_eq!(dropped, 1);
    }
}
