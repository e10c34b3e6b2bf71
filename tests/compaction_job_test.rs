use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use stratadb::{
    BlobConfig, BlobFileMetadata, BlobIndex, BytewiseComparator, CompactionDescriptor,
    CompactionFilter, CompactionFilterDecision, CompactionFilterError, CompactionFilterSupplier,
    CompactionInputLevel, CompactionJob, CompactionJobContext, CompactionJobOptions,
    CompactionReason, CompressionKind, FileMetadata, InternalIterator, IoPriority,
    LocalFileSystem, MergeOperator, MergeOperatorError, RangeTombstone, RowEntry, StrataError,
    TableBuilder, TableStore, Temperature, UserComparator, ValueKind, Version, VersionEdit,
    VersionSet, WriteFileOptions, MAX_SEQUENCE,
};

struct TestDb {
    _dir: TempDir,
    store: Arc<TableStore>,
    versions: Arc<Mutex<VersionSet>>,
    options: Arc<CompactionJobOptions>,
}

fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TableStore::new(
        Arc::new(LocalFileSystem),
        dir.path().to_path_buf(),
        dir.path().to_path_buf(),
    ));
    let versions = Arc::new(Mutex::new(VersionSet::new(
        Arc::new(BytewiseComparator),
        7,
    )));
    TestDb {
        _dir: dir,
        store,
        versions,
        options: Arc::new(CompactionJobOptions {
            paranoid_file_checks: true,
            ..Default::default()
        }),
    }
}

fn write_table(
    db: &TestDb,
    entries: &[RowEntry],
    tombstones: &[RangeTombstone],
) -> Arc<FileMetadata> {
    let file_number = db.versions.lock().new_file_number();
    let mut builder = TableBuilder::new(
        db.store
            .new_table_file(file_number, WriteFileOptions::default())
            .unwrap(),
    );
    for entry in entries {
        builder.add(entry).unwrap();
    }
    for tombstone in tombstones {
        builder.add_range_tombstone(tombstone.clone());
    }
    let info = builder.finish().unwrap();
    let reader = db.store.open_table(file_number).unwrap();
    let (smallest_seq, largest_seq) = entries
        .iter()
        .map(|e| e.key.seq)
        .chain(tombstones.iter().map(|t| t.seq))
        .fold((u64::MAX, 0), |(lo, hi), seq| (lo.min(seq), hi.max(seq)));
    Arc::new(FileMetadata {
        file_number,
        file_size: info.file_size,
        smallest: reader.smallest().cloned(),
        largest: reader.largest().cloned(),
        smallest_seq,
        largest_seq,
        num_entries: info.num_entries,
        num_range_deletions: info.num_range_deletions,
        creation_time: 0,
        oldest_ancester_time: 0,
        oldest_blob_file_number: entries
            .iter()
            .filter(|e| e.key.kind == ValueKind::BlobIndex)
            .filter_map(|e| BlobIndex::decode(&e.value).ok())
            .map(|i| i.blob_file_number)
            .min(),
        temperature: Temperature::Unknown,
        file_checksum: info.checksum,
        unique_id: uuid::Uuid::nil(),
    })
}

fn seed_version(db: &TestDb, files: Vec<(usize, Arc<FileMetadata>)>) {
    let mut edit = VersionEdit::default();
    for (level, meta) in files {
        edit.add_file(level, meta);
    }
    db.versions.lock().log_and_apply(edit).unwrap();
}

fn base_descriptor(db: &TestDb, inputs: Vec<CompactionInputLevel>) -> CompactionDescriptor {
    CompactionDescriptor {
        column_family: "default".to_string(),
        inputs,
        output_level: 1,
        max_output_file_size: 1 << 20,
        max_overlap_bytes: 10 << 20,
        comparator: Arc::new(BytewiseComparator),
        merge_operator: None,
        compaction_filter: None,
        snapshots: vec![],
        earliest_write_conflict: MAX_SEQUENCE,
        bottommost_level: false,
        is_manual_compaction: false,
        per_key_placement: false,
        max_subcompactions: 1,
        rate_priority: IoPriority::Low,
        trim_ts: None,
        tolerate_corrupt_records: false,
        blob: BlobConfig::default(),
        output_temperature: Temperature::Unknown,
        bottommost_temperature: Temperature::Unknown,
        output_compression: CompressionKind::NoCompression,
        advance_round_robin_cursor: false,
        lifetime_registry: None,
        input_version: db.versions.lock().current(),
        reason: CompactionReason::Unknown,
    }
}

fn new_job(db: &TestDb, descriptor: CompactionDescriptor) -> CompactionJob {
    CompactionJob::new(
        1,
        Arc::new(descriptor),
        db.options.clone(),
        db.versions.clone(),
        db.store.clone(),
        Arc::new(AtomicBool::new(false)),
        Arc::new(AtomicBool::new(false)),
        Arc::new(AtomicBool::new(false)),
    )
}

fn run_to_install(db: &TestDb, descriptor: CompactionDescriptor) -> CompactionJob {
    let mut job = new_job(db, descriptor);
    job.prepare().unwrap();
    job.run().unwrap();
    job.install().unwrap();
    job
}

fn read_entries(db: &TestDb, file_number: u64) -> Vec<RowEntry> {
    let reader = db.store.open_table(file_number).unwrap();
    let mut iter = reader.iter(Arc::new(BytewiseComparator));
    let mut entries = Vec::new();
    while let Some(entry) = iter.next_entry().unwrap() {
        entries.push(entry);
    }
    entries
}

fn level_files(version: &Version, level: usize) -> Vec<u64> {
    version
        .files(level)
        .iter()
        .map(|f| f.file_number)
        .collect()
}

#[test]
fn two_overlapping_l0_files_compact_into_one_l1_file() {
    let db = test_db();
    let file_a = write_table(
        &db,
        &[
            RowEntry::new_put(b"a", b"1", 10),
            RowEntry::new_put(b"c", b"1", 11),
        ],
        &[],
    );
    let file_b = write_table(
        &db,
        &[
            RowEntry::new_put(b"a", b"2", 12),
            RowEntry::new_put(b"b", b"9", 13),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file_a.clone()), (0, file_b.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file_b.clone(), file_a.clone()],
        }],
    );
    descriptor.bottommost_level = true;
    let job = run_to_install(&db, descriptor);

    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(
        read_entries(&db, outputs[0].file_number),
        vec![
            RowEntry::new_put(b"a", b"2", 12),
            RowEntry::new_put(b"b", b"9", 13),
            RowEntry::new_put(b"c", b"1", 11),
        ]
    );

    // Inputs removed, output installed, atomically.
    let version = db.versions.lock().current();
    assert!(level_files(&version, 0).is_empty());
    assert_eq!(level_files(&version, 1), vec![outputs[0].file_number]);
    assert_eq!(job.stats().num_input_records, 4);
    assert_eq!(job.stats().num_output_records, 3);
}

#[test]
fn delete_above_all_snapshots_drops_but_snapshot_put_survives() {
    let db = test_db();
    let file = write_table(
        &db,
        &[
            RowEntry::new_delete(b"k", 10),
            RowEntry::new_put(b"k", b"1", 5),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.bottommost_level = true;
    descriptor.snapshots = vec![7];
    let job = run_to_install(&db, descriptor);

    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(
        read_entries(&db, outputs[0].file_number),
        vec![RowEntry::new_put(b"k", b"1", 5)]
    );
}

struct AddMergeOperator;

impl MergeOperator for AddMergeOperator {
    fn merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operand: &[u8],
    ) -> Result<Bytes, MergeOperatorError> {
        let parse = |b: &[u8]| -> i64 {
            std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };
        let sum = existing.map(parse).unwrap_or(0) + parse(operand);
        Ok(Bytes::from(sum.to_string()))
    }
}

#[test]
fn merge_operands_fold_onto_their_base() {
    let db = test_db();
    let file = write_table(
        &db,
        &[
            RowEntry::new_merge(b"x", b"2", 21),
            RowEntry::new_merge(b"x", b"1", 20),
            RowEntry::new_put(b"x", b"5", 19),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.bottommost_level = true;
    descriptor.merge_operator = Some(Arc::new(AddMergeOperator));
    let job = run_to_install(&db, descriptor);

    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(
        read_entries(&db, outputs[0].file_number),
        vec![RowEntry::new_put(b"x", b"8", 21)]
    );
}

#[test]
fn range_delete_splits_across_subcompaction_slices() {
    let db = test_db();

    // A wide L0 file carrying the tombstone and two point records, over two
    // sizable L1 files; the seam at the second L1 file's smallest key is the
    // natural slice boundary.
    let mut l1a_entries = Vec::new();
    for i in 0..150u32 {
        l1a_entries.push(RowEntry::new_put(
            format!("e{:03}", i).as_bytes(),
            &[b'v'; 16],
            3,
        ));
    }
    let mut l1b_entries = Vec::new();
    for i in 0..80u32 {
        l1b_entries.push(RowEntry::new_put(
            format!("m{:03}", i).as_bytes(),
            &[b'v'; 16],
            4,
        ));
    }
    let l0 = write_table(
        &db,
        &[
            RowEntry::new_put(b"b", b"1", 10),
            RowEntry::new_put(b"p", b"1", 20),
        ],
        &[RangeTombstone {
            start: Bytes::from_static(b"a"),
            end: Bytes::from_static(b"z"),
            seq: 50,
        }],
    );
    let l1a = write_table(&db, &l1a_entries, &[]);
    let l1b = write_table(&db, &l1b_entries, &[]);
    seed_version(
        &db,
        vec![(0, l0.clone()), (1, l1a.clone()), (1, l1b.clone())],
    );

    let mut descriptor = base_descriptor(
        &db,
        vec![
            CompactionInputLevel {
                level: 0,
                files: vec![l0],
            },
            CompactionInputLevel {
                level: 1,
                files: vec![l1a, l1b],
            },
        ],
    );
    descriptor.max_subcompactions = 2;
    descriptor.max_output_file_size = 1000;
    let job = run_to_install(&db, descriptor);

    assert_eq!(job.stats().num_subcompactions, 2);
    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert!(outputs.len() >= 2);

    // Every point record is covered by the tombstone; outputs carry only
    // clipped spans.
    let mut spans = Vec::new();
    for meta in &outputs {
        assert_eq!(meta.num_entries, 0);
        assert!(meta.num_range_deletions > 0);
        let reader = db.store.open_table(meta.file_number).unwrap();
        for t in reader.range_tombstones() {
            assert_eq!(t.seq, 50);
            spans.push((t.start.clone(), t.end.clone()));
        }
    }

    // The union of the clipped spans is exactly the original span.
    spans.sort();
    assert_eq!(spans.first().unwrap().0.as_ref(), b"a");
    assert_eq!(spans.last().unwrap().1.as_ref(), b"z");
    for pair in spans.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }

    // Boundary consistency: no span crosses a slice seam into another file.
    for meta in &outputs {
        let reader = db.store.open_table(meta.file_number).unwrap();
        for t in reader.range_tombstones() {
            assert!(t.start < t.end);
        }
    }
}

#[test]
fn single_delete_and_its_put_annihilate() {
    let db = test_db();
    let file = write_table(
        &db,
        &[
            RowEntry::new_single_delete(b"k", 2),
            RowEntry::new_put(b"k", b"v", 1),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.bottommost_level = true;
    let job = run_to_install(&db, descriptor);

    assert_eq!(job.outputs().count(), 0);
    assert_eq!(job.stats().num_single_del_fallthru, 0);
    assert_eq!(job.stats().num_single_del_mismatch, 0);
    let version = db.versions.lock().current();
    assert!(level_files(&version, 0).is_empty());
    assert!(level_files(&version, 1).is_empty());
}

struct CancelAfterSupplier {
    flag: Arc<AtomicBool>,
    limit: usize,
}

struct CancelAfterFilter {
    flag: Arc<AtomicBool>,
    limit: usize,
    seen: usize,
}

impl CompactionFilter for CancelAfterFilter {
    fn filter(
        &mut self,
        _level: usize,
        _user_key: &[u8],
        _kind: ValueKind,
        _value: &[u8],
    ) -> Result<CompactionFilterDecision, CompactionFilterError> {
        self.seen += 1;
        if self.seen >= self.limit {
            self.flag.store(true, AtomicOrdering::SeqCst);
        }
        Ok(CompactionFilterDecision::Keep)
    }
}

impl CompactionFilterSupplier for CancelAfterSupplier {
    fn create_compaction_filter(
        &self,
        _context: &CompactionJobContext,
    ) -> Result<Box<dyn CompactionFilter>, CompactionFilterError> {
        Ok(Box::new(CancelAfterFilter {
            flag: self.flag.clone(),
            limit: self.limit,
            seen: 0,
        }))
    }
}

#[test]
fn manual_cancel_installs_nothing_and_leaves_inputs_alone() {
    let db = test_db();
    let mut entries = Vec::new();
    for i in 0..500u32 {
        entries.push(RowEntry::new_put(
            format!("key{:04}", i).as_bytes(),
            &[b'v'; 8],
            i as u64 + 1,
        ));
    }
    let file = write_table(&db, &entries, &[]);
    seed_version(&db, vec![(0, file.clone())]);
    let files_before = level_files(&db.versions.lock().current(), 0);

    let canceled = Arc::new(AtomicBool::new(false));
    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.is_manual_compaction = true;
    descriptor.compaction_filter = Some(Arc::new(CancelAfterSupplier {
        flag: canceled.clone(),
        limit: 100,
    }));

    let mut job = CompactionJob::new(
        1,
        Arc::new(descriptor),
        db.options.clone(),
        db.versions.clone(),
        db.store.clone(),
        Arc::new(AtomicBool::new(false)),
        canceled,
        Arc::new(AtomicBool::new(false)),
    );
    job.prepare().unwrap();
    let run_error = job.run().unwrap_err();
    assert!(run_error.is_manual_compaction_paused());
    assert!(job.install().is_err());

    let version = db.versions.lock().current();
    assert_eq!(level_files(&version, 0), files_before);
    assert!(level_files(&version, 1).is_empty());
}

#[test]
fn shutdown_fails_the_job_with_shutdown_status() {
    let db = test_db();
    let file = write_table(&db, &[RowEntry::new_put(b"a", b"1", 1)], &[]);
    seed_version(&db, vec![(0, file.clone())]);

    let descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    let mut job = CompactionJob::new(
        1,
        Arc::new(descriptor),
        db.options.clone(),
        db.versions.clone(),
        db.store.clone(),
        Arc::new(AtomicBool::new(true)),
        Arc::new(AtomicBool::new(false)),
        Arc::new(AtomicBool::new(false)),
    );
    job.prepare().unwrap();
    let error = job.run().unwrap_err();
    assert!(error.is_shutdown_in_progress());
}

#[test]
fn outputs_are_sorted_disjoint_and_never_empty() {
    let db = test_db();
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut seq = 1u64;
    let mut make_file = |db: &TestDb| {
        let mut by_key: BTreeMap<Vec<u8>, Vec<RowEntry>> = BTreeMap::new();
        for _ in 0..200 {
            let key = format!("user{:03}", rng.gen_range(0..250)).into_bytes();
            let entry = if rng.gen_bool(0.2) {
                RowEntry::new_delete(&key, seq)
            } else {
                let value = format!("value-{}", seq).into_bytes();
                RowEntry::new_put(&key, &value, seq)
            };
            seq += 1;
            by_key.entry(key).or_default().push(entry);
        }
        let mut entries = Vec::new();
        for (_, mut versions) in by_key {
            versions.sort_by(|a, b| b.key.seq.cmp(&a.key.seq));
            entries.extend(versions);
        }
        write_table(db, &entries, &[])
    };

    let file_a = make_file(&db);
    let file_b = make_file(&db);
    seed_version(&db, vec![(0, file_a.clone()), (0, file_b.clone())]);

    let snapshot = 150u64;
    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file_b.clone(), file_a.clone()],
        }],
    );
    descriptor.bottommost_level = true;
    descriptor.snapshots = vec![snapshot];
    descriptor.max_output_file_size = 2048;

    let input_entries: Vec<RowEntry> = [&file_a, &file_b]
        .iter()
        .flat_map(|f| read_entries(&db, f.file_number))
        .collect();

    let job = run_to_install(&db, descriptor);
    let outputs: Vec<FileMetadata> = job.outputs().cloned().collect();
    assert!(!outputs.is_empty());

    let cmp = BytewiseComparator;
    let mut all_output_entries = Vec::new();
    let mut ranges: Vec<(Bytes, Bytes)> = Vec::new();
    for meta in &outputs {
        let entries = read_entries(&db, meta.file_number);
        // No empty files.
        assert!(!entries.is_empty() || meta.num_range_deletions > 0);
        // Sort invariant: strictly increasing internal keys.
        for pair in entries.windows(2) {
            let ord = stratadb::InternalKeyComparator::new(Arc::new(BytewiseComparator))
                .compare(&pair[0].key, &pair[1].key);
            assert_eq!(ord, Ordering::Less);
        }
        ranges.push((
            entries.first().unwrap().key.user_key.clone(),
            entries.last().unwrap().key.user_key.clone(),
        ));
        all_output_entries.extend(entries);
    }

    // Disjoint outputs: ranges must not overlap.
    ranges.sort();
    for pair in ranges.windows(2) {
        assert_eq!(
            cmp.compare(&pair[0].1, &pair[1].0),
            Ordering::Less,
            "output ranges overlap"
        );
    }

    // Non-increasing sequence set: every output (user_key, seq) pair existed
    // in the inputs.
    let input_pairs: std::collections::HashSet<(Vec<u8>, u64)> = input_entries
        .iter()
        .map(|e| (e.key.user_key.to_vec(), e.key.seq))
        .collect();
    for entry in &all_output_entries {
        assert!(input_pairs.contains(&(entry.key.user_key.to_vec(), entry.key.seq)));
    }

    // Visibility preservation for the snapshot and for latest reads.
    let visible = |entries: &[RowEntry], key: &[u8], upto: u64| -> Option<RowEntry> {
        entries
            .iter()
            .filter(|e| e.key.user_key.as_ref() == key && e.key.seq <= upto)
            .max_by_key(|e| e.key.seq)
            .cloned()
    };
    let keys: std::collections::HashSet<Vec<u8>> = input_entries
        .iter()
        .map(|e| e.key.user_key.to_vec())
        .collect();
    for key in keys {
        for upto in [snapshot, MAX_SEQUENCE] {
            let before = visible(&input_entries, &key, upto);
            let after = visible(&all_output_entries, &key, upto);
            let value_of = |e: Option<RowEntry>| -> Option<Bytes> {
                e.and_then(|e| match e.key.kind {
                    ValueKind::Put => Some(e.value),
                    _ => None,
                })
            };
            assert_eq!(
                value_of(before),
                value_of(after),
                "visibility changed for {:?} at {}",
                String::from_utf8_lossy(&key),
                upto
            );
        }
    }
}

#[test]
fn recompacting_the_outputs_is_idempotent() {
    let db = test_db();
    let file_a = write_table(
        &db,
        &[
            RowEntry::new_put(b"a", b"1", 10),
            RowEntry::new_delete(b"b", 12),
            RowEntry::new_put(b"c", b"3", 14),
        ],
        &[],
    );
    let file_b = write_table(
        &db,
        &[
            RowEntry::new_put(b"b", b"2", 8),
            RowEntry::new_put(b"d", b"4", 9),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file_a.clone()), (0, file_b.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file_a, file_b],
        }],
    );
    descriptor.bottommost_level = true;
    let job = run_to_install(&db, descriptor);
    let first_outputs: Vec<FileMetadata> = job.outputs().cloned().collect();
    let first_entries: Vec<RowEntry> = first_outputs
        .iter()
        .flat_map(|m| read_entries(&db, m.file_number))
        .collect();

    // Run the engine over its own outputs with the same descriptor shape.
    let inputs: Vec<Arc<FileMetadata>> = db.versions.lock().current().files(1).to_vec();
    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 1,
            files: inputs,
        }],
    );
    descriptor.output_level = 2;
    descriptor.bottommost_level = true;
    let job = run_to_install(&db, descriptor);
    let second_entries: Vec<RowEntry> = job
        .outputs()
        .flat_map(|m| read_entries(&db, m.file_number))
        .collect();

    assert_eq!(first_entries, second_entries);
}

#[test]
fn large_values_move_to_a_blob_sidecar() {
    let db = test_db();
    let file = write_table(
        &db,
        &[
            RowEntry::new_put(b"big", &[b'x'; 256], 10),
            RowEntry::new_put(b"small", b"v", 11),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.blob = BlobConfig {
        enabled: true,
        starting_level: 0,
        min_value_size: 128,
    };
    let job = run_to_install(&db, descriptor);

    assert_eq!(job.stats().num_output_files_blob, 1);
    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert_eq!(outputs.len(), 1);
    let entries = read_entries(&db, outputs[0].file_number);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key.kind, ValueKind::BlobIndex);
    let index = BlobIndex::decode(&entries[0].value).unwrap();
    assert_eq!(index.size, 256);
    assert_eq!(outputs[0].oldest_blob_file_number, Some(index.blob_file_number));
    assert_eq!(entries[1].key.kind, ValueKind::Put);

    let version = db.versions.lock().current();
    let blob_state = version.blob_files().get(&index.blob_file_number).unwrap();
    assert_eq!(blob_state.meta.blob_count, 1);
    assert_eq!(blob_state.meta.total_blob_bytes, 256);
}

#[test]
fn dropped_blob_references_accumulate_garbage() {
    let db = test_db();
    let blob_file_number = 90u64;
    let kept_index = BlobIndex {
        blob_file_number,
        offset: 0,
        size: 100,
    };
    let dropped_index = BlobIndex {
        blob_file_number,
        offset: 100,
        size: 50,
    };
    let file = write_table(
        &db,
        &[
            RowEntry::new_blob_index(b"k1", kept_index.encode(), 5),
            RowEntry::new_delete(b"k2", 9),
            RowEntry::new_blob_index(b"k2", dropped_index.encode(), 6),
        ],
        &[],
    );
    {
        let mut edit = VersionEdit::default();
        edit.add_blob_file(Arc::new(BlobFileMetadata {
            blob_file_number,
            blob_count: 2,
            total_blob_bytes: 150,
            checksum: 0,
        }));
        edit.add_file(0, file.clone());
        db.versions.lock().log_and_apply(edit).unwrap();
    }

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.bottommost_level = true;
    let job = run_to_install(&db, descriptor);

    // k2's reference was dropped with its tombstone; k1's survived.
    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert_eq!(outputs.len(), 1);
    let entries = read_entries(&db, outputs[0].file_number);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key.user_key.as_ref(), b"k1");

    let version = db.versions.lock().current();
    let blob_state = version.blob_files().get(&blob_file_number).unwrap();
    assert_eq!(blob_state.garbage_count, 1);
    assert_eq!(blob_state.garbage_bytes, 50);
}

struct CountingListener {
    files_started: AtomicUsize,
    files_finished: AtomicUsize,
    subcompactions_begun: AtomicUsize,
    subcompactions_completed: AtomicUsize,
}

impl stratadb::EventListener for CountingListener {
    fn on_table_file_creation_started(&self, _info: &stratadb::TableFileCreationInfo) {
        self.files_started.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn on_table_file_creation_finished(
        &self,
        _info: &stratadb::TableFileCreationInfo,
        _status: &Result<(), StrataError>,
    ) {
        self.files_finished.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn on_subcompaction_begin(&self, _info: &stratadb::SubcompactionJobInfo) {
        self.subcompactions_begun.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn on_subcompaction_completed(&self, _info: &stratadb::SubcompactionJobInfo) {
        self.subcompactions_completed.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

#[test]
fn listeners_observe_file_and_subcompaction_events() {
    let mut db = test_db();
    let listener = Arc::new(CountingListener {
        files_started: AtomicUsize::new(0),
        files_finished: AtomicUsize::new(0),
        subcompactions_begun: AtomicUsize::new(0),
        subcompactions_completed: AtomicUsize::new(0),
    });
    db.options = Arc::new(CompactionJobOptions {
        listeners: vec![listener.clone()],
        ..Default::default()
    });

    let file = write_table(
        &db,
        &[
            RowEntry::new_put(b"a", b"1", 1),
            RowEntry::new_put(b"b", b"2", 2),
        ],
        &[],
    );
    seed_version(&db, vec![(0, file.clone())]);
    let descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    run_to_install(&db, descriptor);

    assert_eq!(listener.files_started.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(listener.files_finished.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(listener.subcompactions_begun.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(
        listener.subcompactions_completed.load(AtomicOrdering::SeqCst),
        1
    );
}

#[test]
fn target_file_size_cuts_outputs_without_breaking_order() {
    let db = test_db();
    let mut entries = Vec::new();
    for i in 0..300u32 {
        entries.push(RowEntry::new_put(
            format!("key{:04}", i).as_bytes(),
            &[b'v'; 32],
            i as u64 + 1,
        ));
    }
    let file = write_table(&db, &entries, &[]);
    seed_version(&db, vec![(0, file.clone())]);

    let mut descriptor = base_descriptor(
        &db,
        vec![CompactionInputLevel {
            level: 0,
            files: vec![file],
        }],
    );
    descriptor.max_output_file_size = 2048;
    let job = run_to_install(&db, descriptor);

    let outputs: Vec<&FileMetadata> = job.outputs().collect();
    assert!(outputs.len() > 1, "expected the size policy to cut files");
    // Outputs ordered by slice construction; key ranges must chain.
    for pair in outputs.windows(2) {
        assert!(pair[0].largest_user_key().unwrap() < pair[1].smallest_user_key().unwrap());
    }
    let total_records: u64 = outputs.iter().map(|m| m.num_entries).sum();
    assert_eq!(total_records, 300);
}
