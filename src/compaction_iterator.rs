use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;

use crate::blob::BlobFileBuilder;
use crate::comparator::UserComparator;
use crate::compaction_filter::{CompactionFilter, CompactionFilterDecision};
use crate::error::StrataError;
use crate::iter::InternalIterator;
use crate::merge_operator::MergeOperatorType;
use crate::range_tombstones::{snapshot_stripe, CompactionRangeDelAggregator};
use crate::stats::CompactionIterationStats;
use crate::types::{InternalKey, RowEntry, ValueKind};

/// How a run of merge operands ended; decides whether the fold may become a
/// full value or must stay a combined operand.
enum MergeRunEnd {
    /// A `Put` base was consumed into the fold.
    Base(Bytes),
    /// A tombstone (point or range) kills everything below the operands.
    Tombstone,
    /// A snapshot boundary separates the operands from older records.
    StripeBoundary,
    /// No more records for this user key in the inputs.
    EndOfKey,
    /// The base exists but cannot be folded here (blob-resident value).
    Unfoldable,
}

/// Applies the per-key rules to the merged input stream and emits the
/// surviving records: snapshot visibility, the user compaction filter, merge
/// folding, range-delete masking, bottommost simplification, and
/// single-delete pairing. One instance drives one sub-compaction.
pub struct CompactionIterator<'a> {
    input: Box<dyn InternalIterator + 'a>,
    cmp: Arc<dyn UserComparator>,
    /// Live snapshot sequences, ascending.
    snapshots: Vec<u64>,
    earliest_write_conflict: u64,
    merge_operator: Option<MergeOperatorType>,
    filter: Option<Box<dyn CompactionFilter>>,
    filter_level: usize,
    range_del_agg: &'a CompactionRangeDelAggregator,
    blob_builder: Option<BlobFileBuilder>,
    blob_min_value_size: usize,
    bottommost_level: bool,
    tolerate_corrupt_records: bool,
    enforce_single_del_contracts: bool,
    shutting_down: Arc<AtomicBool>,
    manual_compaction_canceled: Arc<AtomicBool>,

    stats: CompactionIterationStats,
    peeked: Option<RowEntry>,
    /// Entry that must be emitted verbatim before pulling more input; used
    /// when a merge run sits on a base that cannot be folded.
    pending_output: Option<RowEntry>,
    current_user_key: Option<Bytes>,
    /// Snapshot stripe already holding an emitted (or deliberately dropped)
    /// record for the current user key; anything older in the same stripe is
    /// hidden.
    last_covered_stripe: Option<usize>,
    skip_until: Option<Bytes>,
}

#[allow(clippy::too_many_arguments)]
impl<'a> CompactionIterator<'a> {
    pub fn new(
        input: Box<dyn InternalIterator + 'a>,
        cmp: Arc<dyn UserComparator>,
        snapshots: Vec<u64>,
        earliest_write_conflict: u64,
        merge_operator: Option<MergeOperatorType>,
        filter: Option<Box<dyn CompactionFilter>>,
        filter_level: usize,
        range_del_agg: &'a CompactionRangeDelAggregator,
        blob_builder: Option<BlobFileBuilder>,
        blob_min_value_size: usize,
        bottommost_level: bool,
        tolerate_corrupt_records: bool,
        enforce_single_del_contracts: bool,
        shutting_down: Arc<AtomicBool>,
        manual_compaction_canceled: Arc<AtomicBool>,
    ) -> Result<Self, StrataError> {
        if let Some(filter) = &filter {
            if !filter.ignore_snapshots() {
                return Err(StrataError::not_supported(
                    "CompactionFilter::ignore_snapshots() = false is not supported",
                ));
            }
        }
        Ok(Self {
            input,
            cmp,
            snapshots,
            earliest_write_conflict,
            merge_operator,
            filter,
            filter_level,
            range_del_agg,
            blob_builder,
            blob_min_value_size,
            bottommost_level,
            tolerate_corrupt_records,
            enforce_single_del_contracts,
            shutting_down,
            manual_compaction_canceled,
            stats: CompactionIterationStats::default(),
            peeked: None,
            pending_output: None,
            current_user_key: None,
            last_covered_stripe: None,
            skip_until: None,
        })
    }

    pub fn stats(&self) -> &CompactionIterationStats {
        &self.stats
    }

    pub fn take_blob_builder(&mut self) -> Option<BlobFileBuilder> {
        self.blob_builder.take()
    }

    pub fn next_entry(&mut self) -> Result<Option<RowEntry>, StrataError> {
        loop {
            if self.shutting_down.load(AtomicOrdering::Relaxed) {
                return Err(StrataError::ShutdownInProgress);
            }
            if self.manual_compaction_canceled.load(AtomicOrdering::Relaxed) {
                return Err(StrataError::ManualCompactionPaused);
            }
            if let Some(pending) = self.pending_output.take() {
                return Ok(Some(pending));
            }

            let Some(entry) = self.input_next()? else {
                return Ok(None);
            };
            self.count_input(&entry);

            if let Some(skip) = self.skip_until.clone() {
                if self.cmp.compare(&entry.key.user_key, &skip) == Ordering::Less {
                    self.stats.num_record_drop_user += 1;
                    continue;
                }
                self.skip_until = None;
            }

            let user_key = entry.key.user_key.clone();
            let is_new_key = match &self.current_user_key {
                Some(current) => self.cmp.compare(&user_key, current) != Ordering::Equal,
                None => true,
            };
            if is_new_key {
                self.current_user_key = Some(user_key.clone());
                self.last_covered_stripe = None;
            }

            let stripe = self.stripe_of(entry.key.seq);
            if self.last_covered_stripe == Some(stripe) {
                self.stats.num_record_drop_hidden += 1;
                continue;
            }

            match entry.key.kind {
                ValueKind::Put | ValueKind::BlobIndex => {
                    if let Some(out) = self.handle_put(entry, stripe)? {
                        return Ok(Some(out));
                    }
                }
                ValueKind::Delete => {
                    if self.range_del_agg.should_delete(&entry.key) {
                        self.stats.num_record_drop_range_del += 1;
                        continue;
                    }
                    self.last_covered_stripe = Some(stripe);
                    if self.bottommost_level && stripe == self.above_all_stripe() {
                        self.stats.num_record_drop_obsolete += 1;
                        continue;
                    }
                    return Ok(Some(entry));
                }
                ValueKind::SingleDelete => {
                    if self.range_del_agg.should_delete(&entry.key) {
                        self.stats.num_record_drop_range_del += 1;
                        continue;
                    }
                    if let Some(out) = self.handle_single_delete(entry, stripe)? {
                        return Ok(Some(out));
                    }
                }
                ValueKind::Merge => {
                    if self.range_del_agg.should_delete(&entry.key) {
                        self.stats.num_record_drop_range_del += 1;
                        continue;
                    }
                    if let Some(out) = self.handle_merge(entry, stripe)? {
                        return Ok(Some(out));
                    }
                }
                ValueKind::RangeDelete => {
                    // Range deletions travel through the aggregator, never
                    // the point stream.
                    if !self.tolerate_corrupt_records {
                        return Err(StrataError::corruption(
                            "range deletion in point-record stream",
                        ));
                    }
                    self.stats.num_input_corrupt_records += 1;
                }
            }
        }
    }

    fn handle_put(
        &mut self,
        mut entry: RowEntry,
        stripe: usize,
    ) -> Result<Option<RowEntry>, StrataError> {
        let user_key = entry.key.user_key.clone();
        if stripe == self.above_all_stripe() {
            if let Some(filter) = self.filter.as_mut() {
                match filter.filter(
                    self.filter_level,
                    &user_key,
                    entry.key.kind,
                    &entry.value,
                )? {
                    CompactionFilterDecision::Keep => {}
                    CompactionFilterDecision::Remove => {
                        self.stats.num_record_drop_user += 1;
                        self.last_covered_stripe = Some(stripe);
                        if self.bottommost_level {
                            return Ok(None);
                        }
                        return Ok(Some(RowEntry::new(
                            InternalKey::new(user_key, entry.key.seq, ValueKind::Delete),
                            Bytes::new(),
                        )));
                    }
                    CompactionFilterDecision::ChangeValue(value) => {
                        entry.value = value;
                    }
                    CompactionFilterDecision::RemoveAndSkipUntil(skip) => {
                        self.stats.num_record_drop_user += 1;
                        self.input.seek(&skip)?;
                        self.peeked = None;
                        self.skip_until = Some(skip);
                        return Ok(None);
                    }
                }
            }
        }
        if self.range_del_agg.should_delete(&entry.key) {
            self.stats.num_record_drop_range_del += 1;
            return Ok(None);
        }
        self.last_covered_stripe = Some(stripe);
        let entry = self.maybe_relocate_to_blob(entry)?;
        Ok(Some(entry))
    }

    fn handle_single_delete(
        &mut self,
        entry: RowEntry,
        stripe: usize,
    ) -> Result<Option<RowEntry>, StrataError> {
        let user_key = entry.key.user_key.clone();
        let next_same_key = self.peek_same_key(&user_key)?;
        match next_same_key {
            Some((next_seq, next_kind)) if self.stripe_of(next_seq) == stripe => match next_kind {
                ValueKind::Put | ValueKind::BlobIndex => {
                    if entry.key.seq <= self.earliest_write_conflict {
                        // The pair annihilates; no write-conflict check can
                        // still need it.
                        let put = self.input_next()?.expect("peeked entry");
                        self.count_input(&put);
                        self.stats.num_record_drop_obsolete += 2;
                        self.stats.num_optimized_del_drop_obsolete += 1;
                        Ok(None)
                    } else {
                        // Both records stay visible for conflict checking;
                        // the stripe is deliberately not covered so the put
                        // survives too.
                        Ok(Some(entry))
                    }
                }
                _ => {
                    self.stats.num_single_del_mismatch += 1;
                    if self.enforce_single_del_contracts {
                        return Err(StrataError::corruption(
                            "SingleDelete preceded by a non-Put record for the same key",
                        ));
                    }
                    self.last_covered_stripe = Some(stripe);
                    Ok(Some(entry))
                }
            },
            Some(_) => {
                // A snapshot separates the single delete from its partner;
                // both must remain visible.
                self.last_covered_stripe = Some(stripe);
                Ok(Some(entry))
            }
            None => {
                self.last_covered_stripe = Some(stripe);
                if self.bottommost_level && stripe == self.above_all_stripe() {
                    self.stats.num_record_drop_obsolete += 1;
                    return Ok(None);
                }
                self.stats.num_single_del_fallthru += 1;
                Ok(Some(entry))
            }
        }
    }

    fn handle_merge(
        &mut self,
        first: RowEntry,
        stripe: usize,
    ) -> Result<Option<RowEntry>, StrataError> {
        let user_key = first.key.user_key.clone();
        let top_seq = first.key.seq;
        let mut operands = vec![first.value];
        let mut end = MergeRunEnd::EndOfKey;

        loop {
            let Some((next_seq, next_kind)) = self.peek_same_key(&user_key)? else {
                end = MergeRunEnd::EndOfKey;
                break;
            };
            if self.stripe_of(next_seq) != stripe {
                end = MergeRunEnd::StripeBoundary;
                break;
            }
            match next_kind {
                ValueKind::Merge => {
                    let operand = self.input_next()?.expect("peeked entry");
                    self.count_input(&operand);
                    if self.range_del_agg.should_delete(&operand.key) {
                        // The tombstone hides this operand and everything
                        // older; fold what we have over nothing.
                        self.stats.num_record_drop_range_del += 1;
                        end = MergeRunEnd::Tombstone;
                        break;
                    }
                    operands.push(operand.value);
                }
                ValueKind::Put => {
                    let base = self.input_next()?.expect("peeked entry");
                    self.count_input(&base);
                    if self.range_del_agg.should_delete(&base.key) {
                        self.stats.num_record_drop_range_del += 1;
                        end = MergeRunEnd::Tombstone;
                    } else {
                        self.stats.num_record_drop_hidden += 1;
                        end = MergeRunEnd::Base(base.value);
                    }
                    break;
                }
                ValueKind::BlobIndex => {
                    let base = self.input_next()?.expect("peeked entry");
                    self.count_input(&base);
                    if self.range_del_agg.should_delete(&base.key) {
                        self.stats.num_record_drop_range_del += 1;
                        end = MergeRunEnd::Tombstone;
                    } else {
                        // The base lives in a blob sidecar and cannot be
                        // folded here; re-emit it right after the combined
                        // operand.
                        self.pending_output = Some(base);
                        end = MergeRunEnd::Unfoldable;
                    }
                    break;
                }
                ValueKind::Delete | ValueKind::SingleDelete => {
                    // The tombstone stays in the stream; it is dropped next
                    // round as hidden (or as obsolete at the bottommost
                    // level).
                    end = MergeRunEnd::Tombstone;
                    break;
                }
                ValueKind::RangeDelete => {
                    end = MergeRunEnd::Unfoldable;
                    break;
                }
            }
        }

        let operator = self.merge_operator.clone().ok_or_else(|| {
            StrataError::invalid_argument("merge operand found but no merge operator is configured")
        })?;
        self.stats.num_record_drop_hidden += operands.len() as u64 - 1;
        self.last_covered_stripe = Some(stripe);

        let folded_put = |base: Option<Bytes>, operands: &[Bytes]| -> Result<Bytes, StrataError> {
            let mut acc = base;
            for operand in operands.iter().rev() {
                acc = Some(operator.merge(&user_key, acc.as_deref(), operand)?);
            }
            Ok(acc.expect("at least one operand"))
        };

        let end_of_key = matches!(end, MergeRunEnd::EndOfKey);
        match end {
            MergeRunEnd::Base(base) => {
                let value = folded_put(Some(base), &operands)?;
                let entry = RowEntry::new(
                    InternalKey::new(user_key.clone(), top_seq, ValueKind::Put),
                    value,
                );
                Ok(Some(self.maybe_relocate_to_blob(entry)?))
            }
            MergeRunEnd::Tombstone => {
                let value = folded_put(None, &operands)?;
                let entry = RowEntry::new(
                    InternalKey::new(user_key.clone(), top_seq, ValueKind::Put),
                    value,
                );
                Ok(Some(self.maybe_relocate_to_blob(entry)?))
            }
            MergeRunEnd::EndOfKey | MergeRunEnd::StripeBoundary | MergeRunEnd::Unfoldable => {
                if end_of_key && self.bottommost_level && stripe == self.above_all_stripe() {
                    // Nothing below anywhere: the fold is the full value.
                    let value = folded_put(None, &operands)?;
                    let entry = RowEntry::new(
                        InternalKey::new(user_key.clone(), top_seq, ValueKind::Put),
                        value,
                    );
                    return Ok(Some(self.maybe_relocate_to_blob(entry)?));
                }
                // The base (if any) is out of reach; combine the operands
                // into one operand. Associativity of the merge operator
                // makes the combination sound.
                let value = if operands.len() == 1 {
                    operands.into_iter().next().expect("one operand")
                } else {
                    folded_put(None, &operands)?
                };
                Ok(Some(RowEntry::new(
                    InternalKey::new(user_key, top_seq, ValueKind::Merge),
                    value,
                )))
            }
        }
    }

    fn maybe_relocate_to_blob(&mut self, entry: RowEntry) -> Result<RowEntry, StrataError> {
        if entry.key.kind != ValueKind::Put {
            return Ok(entry);
        }
        let Some(builder) = self.blob_builder.as_mut() else {
            return Ok(entry);
        };
        if entry.value.len() < self.blob_min_value_size {
            return Ok(entry);
        }
        let index = builder.add(&entry.key.user_key, &entry.value)?;
        Ok(RowEntry::new(
            InternalKey::new(entry.key.user_key, entry.key.seq, ValueKind::BlobIndex),
            index.encode(),
        ))
    }

    fn stripe_of(&self, seq: u64) -> usize {
        snapshot_stripe(&self.snapshots, seq)
    }

    fn above_all_stripe(&self) -> usize {
        self.snapshots.len()
    }

    fn count_input(&mut self, entry: &RowEntry) {
        self.stats.num_input_records += 1;
        self.stats.total_input_raw_key_bytes += entry.key.encoded_len() as u64;
        self.stats.total_input_raw_value_bytes += entry.value.len() as u64;
        if entry.key.kind.is_deletion() {
            self.stats.num_input_deletion_records += 1;
        }
    }

    fn input_next_raw(&mut self) -> Result<Option<RowEntry>, StrataError> {
        loop {
            match self.input.next_entry() {
                Ok(entry) => return Ok(entry),
                Err(StrataError::Corruption { .. }) if self.tolerate_corrupt_records => {
                    self.stats.num_input_corrupt_records += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn input_next(&mut self) -> Result<Option<RowEntry>, StrataError> {
        if let Some(entry) = self.peeked.take() {
            return Ok(Some(entry));
        }
        self.input_next_raw()
    }

    fn peek_same_key(&mut self, user_key: &Bytes) -> Result<Option<(u64, ValueKind)>, StrataError> {
        if self.peeked.is_none() {
            self.peeked = self.input_next_raw()?;
        }
        Ok(self.peeked.as_ref().and_then(|next| {
            (self.cmp.compare(&next.key.user_key, user_key) == Ordering::Equal)
                .then(|| (next.key.seq, next.key.kind))
        }))
    }
}
