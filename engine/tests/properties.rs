//! Property-based tests for the merge engine.

use chrono::{SecondsFormat, TimeZone, Utc};
use proptest::prelude::*;
use shelfsync_engine::{
    checksum, import, merge_records, BookRecord, ExportFile, MergeContext, ReadingStatus,
    Validator,
};
use std::collections::BTreeMap;

const TITLES: [&str; 3] = ["Dune", "Emma", "Ulysses"];
const AUTHORS: [&str; 2] = ["Herbert", "Austen"];
const TAGS: [&str; 4] = ["scifi", "classic", "to-lend", "signed"];
const NOTES: [&str; 4] = ["", "great opening", "reread ch. 3", "great"];

fn timestamp(secs: i64) -> String {
    Utc.timestamp_opt(1_704_067_200 + secs, 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn arb_status() -> impl Strategy<Value = ReadingStatus> {
    prop::sample::select(ReadingStatus::ALL.to_vec())
}

/// Records drawn from small pools so that ids, fingerprints and field values
/// collide often.
fn arb_book() -> impl Strategy<Value = BookRecord> {
    (
        0usize..12,
        0usize..3,
        0usize..2,
        0u8..=100,
        arb_status(),
        prop::sample::subsequence(TAGS.to_vec(), 0..3),
        prop::sample::select(NOTES.to_vec()),
        0i64..50,
    )
        .prop_map(|(id, title, author, progress, status, tags, notes, secs)| {
            BookRecord::new(
                format!("b-{id:02}"),
                TITLES[title],
                AUTHORS[author],
                timestamp(secs * 60),
            )
            .with_progress(progress)
            .with_status(status)
            .with_tags(tags)
            .with_notes(notes)
        })
}

fn arb_set() -> impl Strategy<Value = Vec<BookRecord>> {
    prop::collection::vec(arb_book(), 0..16)
}

/// A store's contents: unique ids, a fixed status, and timestamps that never
/// tie across devices.
fn arb_device(device: i64) -> impl Strategy<Value = Vec<BookRecord>> {
    prop::collection::vec(
        (
            0usize..10,
            0u8..=100,
            prop::sample::subsequence(TAGS.to_vec(), 0..3),
            prop::sample::select(NOTES.to_vec()),
            prop::sample::select(vec!["hardcover", "paperback"]),
            0i64..100,
        ),
        0..10,
    )
    .prop_map(move |rows| {
        let unique: BTreeMap<String, BookRecord> = rows
            .into_iter()
            .map(|(id, progress, tags, notes, format, slot)| {
                let id = format!("b-{id:02}");
                let record = BookRecord::new(&id, format!("Title {id}"), "Author", timestamp(slot * 4 + device))
                    .with_progress(progress)
                    .with_tags(tags)
                    .with_notes(notes)
                    .with_metadata("format", format);
                (id, record)
            })
            .collect();
        unique.into_values().collect()
    })
}

fn sync(target: &[BookRecord], target_id: &str, source: &[BookRecord], source_id: &str) -> Vec<BookRecord> {
    merge_records(target, source, &MergeContext::new(target_id, source_id)).books()
}

proptest! {
    #[test]
    fn prop_merge_idempotent(local in arb_set(), remote in arb_set()) {
        let ctx = MergeContext::new("laptop", "phone");
        let once = merge_records(&local, &remote, &ctx);
        let twice = merge_records(&once.books(), &remote, &ctx);

        prop_assert_eq!(once.books(), twice.books());
        prop_assert_eq!(twice.counts.added, 0);
        prop_assert_eq!(twice.counts.updated, 0);
    }

    #[test]
    fn prop_merge_ignores_input_order(
        (local, remote, local_shuffled, remote_shuffled) in (arb_set(), arb_set())
            .prop_flat_map(|(l, r)| (Just(l.clone()), Just(r.clone()), Just(l).prop_shuffle(), Just(r).prop_shuffle()))
    ) {
        let ctx = MergeContext::new("laptop", "phone");
        let a = merge_records(&local, &remote, &ctx);
        let b = merge_records(&local_shuffled, &remote_shuffled, &ctx);

        prop_assert_eq!(a.books(), b.books());
        prop_assert_eq!(a.counts, b.counts);
        prop_assert_eq!(a.conflicts, b.conflicts);
        prop_assert_eq!(a.pending_decisions, b.pending_decisions);
    }

    #[test]
    fn prop_resolution_is_repeatable(local in arb_set(), remote in arb_set()) {
        let ctx = MergeContext::new("laptop", "phone");
        let runs: Vec<_> = (0..3).map(|_| merge_records(&local, &remote, &ctx)).collect();

        for run in &runs[1..] {
            prop_assert_eq!(&run.conflicts, &runs[0].conflicts);
            prop_assert_eq!(run.books(), runs[0].books());
        }
    }

    #[test]
    fn prop_export_import_roundtrip(set in arb_device(0)) {
        let file = ExportFile::new(set.clone(), "2.0.0", Utc::now());
        let bytes = file.to_bytes().unwrap();

        let imported = import(&bytes).unwrap();
        let validated = Validator::new().validate_batch(&imported.books);
        prop_assert!(validated.is_clean());

        let records: Vec<BookRecord> = validated.valid.into_iter().map(|v| v.into_record()).collect();
        prop_assert_eq!(checksum(&records), checksum(&set));
        prop_assert_eq!(imported.metadata.checksum, checksum(&set));
    }

    #[test]
    fn prop_chain_of_syncs_converges(
        d0 in arb_device(0),
        d1 in arb_device(1),
        d2 in arb_device(2),
        d3 in arb_device(3),
    ) {
        let ids = ["d0", "d1", "d2", "d3"];
        let mut devices = vec![d0, d1, d2, d3];

        for i in 0..3 {
            devices[i + 1] = sync(&devices[i + 1], ids[i + 1], &devices[i], ids[i]);
        }
        for i in (0..3).rev() {
            devices[i] = sync(&devices[i], ids[i], &devices[i + 1], ids[i + 1]);
        }

        let sums: Vec<String> = devices.iter().map(|d| checksum(d)).collect();
        prop_assert!(sums.iter().all(|s| s == &sums[0]), "checksums diverged: {:?}", sums);
    }

    #[test]
    fn prop_bidirectional_sync_converges(a in arb_device(0), b in arb_device(1)) {
        let b2 = sync(&b, "phone", &a, "laptop");
        let a2 = sync(&a, "laptop", &b2, "phone");
        prop_assert_eq!(checksum(&a2), checksum(&b2));
    }
}
