//! Backend-agnostic contract tests (C10, spec §8): one set of assertions
//! exercising every numbered invariant and end-to-end scenario in spec §8
//! against whichever [`msgvault::Store`] implementation a caller hands in.
//!
//! Each backend crate's own `tests/contract.rs` opens a fresh namespace with
//! its own setup (a temp sled directory, an in-memory SQLite pool, a
//! throwaway Postgres schema) and calls these functions, the way `thalo`'s
//! `tests_cfg` module gives every aggregate test a shared fixture instead of
//! three copies of the same bank-account event log. Functions panic (via
//! `assert!`/`assert_eq!`) on violation, so callers just wrap them in
//! `#[tokio::test]`.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use msgvault::{
    CategoryOpts, ConsumerGroup, ImportRecord, ListStreamsOpts, NewMessage, Store, StreamOpts,
    WriteOpts,
};
use serde_json::json;
use uuid::Uuid;

/// Spec §8 invariant 1 + scenario 1 ("sequential stream"): writes with no
/// expected-version failures land at gapless positions `0..n`, in commit
/// order, and `version`/`last` agree with the final write.
pub async fn sequential_stream_is_gapless(store: &dyn Store, ns: &str) {
    let stream = unique_stream("account");

    for msg_type in ["A", "B", "C"] {
        let (position, _) = store
            .write(ns, &stream, NewMessage::new(msg_type, json!({})), WriteOpts::default())
            .await
            .expect("write should succeed");
        assert!(position >= 0);
    }

    let messages = store
        .get_stream(ns, &stream, StreamOpts::default())
        .await
        .expect("get_stream should succeed");
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages.iter().map(|m| m.position).collect::<Vec<_>>(),
        vec![messages[0].position, messages[0].position + 1, messages[0].position + 2]
    );
    assert_eq!(
        messages.iter().map(|m| m.msg_type.as_str()).collect::<Vec<_>>(),
        vec!["A", "B", "C"]
    );

    let version = store.version(ns, &stream).await.expect("version should succeed");
    assert_eq!(version, Some(messages.last().unwrap().position));

    let last = store.last(ns, &stream, None).await.expect("last should succeed");
    assert_eq!(last.unwrap().msg_type, "C");
}

/// Spec §8 invariant 2 ("global monotonicity"): messages committed in order
/// across unrelated streams still observe strictly increasing global
/// positions.
pub async fn global_position_is_monotonic_across_streams(store: &dyn Store, ns: &str) {
    let stream_a = unique_stream("order");
    let stream_b = unique_stream("order");

    let (_, gp1) = store
        .write(ns, &stream_a, NewMessage::new("Placed", json!({})), WriteOpts::default())
        .await
        .unwrap();
    let (_, gp2) = store
        .write(ns, &stream_b, NewMessage::new("Placed", json!({})), WriteOpts::default())
        .await
        .unwrap();
    let (_, gp3) = store
        .write(ns, &stream_a, NewMessage::new("Shipped", json!({})), WriteOpts::default())
        .await
        .unwrap();

    assert!(gp1 < gp2);
    assert!(gp2 < gp3);
}

/// Spec §8 scenario 2 ("optimistic conflict"): of N concurrent writers
/// presenting the same `expected_version`, exactly one succeeds.
pub async fn optimistic_concurrency_exactly_one_writer_wins(store: &dyn Store, ns: &str, writers: usize) {
    let stream = unique_stream("order");
    let (initial_position, _) = store
        .write(ns, &stream, NewMessage::new("Placed", json!({})), WriteOpts::default())
        .await
        .unwrap();

    let mut successes = 0;
    let mut conflicts = 0;
    for i in 0..writers {
        let result = store
            .write(
                ns,
                &stream,
                NewMessage::new("Paid", json!({ "attempt": i })),
                WriteOpts {
                    id: None,
                    expected_version: Some(initial_position),
                },
            )
            .await;
        match result {
            Ok((position, _)) => {
                successes += 1;
                assert_eq!(position, initial_position + 1);
            }
            Err(msgvault::Error::VersionConflict { expected, actual }) => {
                conflicts += 1;
                assert_eq!(expected, initial_position);
                assert_eq!(actual, Some(initial_position));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1, "exactly one writer should win the race");
    assert_eq!(conflicts, writers - 1);
}

/// `expected_version = -1` succeeds iff the stream does not yet exist.
pub async fn expected_version_minus_one_requires_empty_stream(store: &dyn Store, ns: &str) {
    let stream = unique_stream("widget");

    store
        .write(
            ns,
            &stream,
            NewMessage::new("Created", json!({})),
            WriteOpts { id: None, expected_version: Some(-1) },
        )
        .await
        .expect("-1 should succeed against an empty stream");

    let err = store
        .write(
            ns,
            &stream,
            NewMessage::new("Created", json!({})),
            WriteOpts { id: None, expected_version: Some(-1) },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, msgvault::Error::VersionConflict { expected: -1, actual: Some(0) }));
}

/// Spec §8 scenario 3 ("consumer groups"): a category partitioned across
/// `size` members assigns every cardinal id to exactly one member, with
/// compound ids of the same cardinal id landing together.
pub async fn consumer_group_partitions_streams(store: &dyn Store, ns: &str) {
    let category = unique_stream("user").replace('-', "_"); // category must itself contain no '-'
    let streams = [
        format!("{category}-111"),
        format!("{category}-111+a"),
        format!("{category}-111+b"),
        format!("{category}-222"),
    ];
    for stream in &streams {
        store
            .write(ns, stream, NewMessage::new("Created", json!({})), WriteOpts::default())
            .await
            .unwrap();
    }

    const SIZE: i64 = 2;
    let mut seen_streams: HashSet<String> = HashSet::new();
    let mut member_of: HashMap<String, i64> = HashMap::new();

    for member in 0..SIZE {
        let messages = store
            .get_category(
                ns,
                &category,
                CategoryOpts {
                    consumer_group: Some(ConsumerGroup { member, size: SIZE }),
                    ..CategoryOpts::default()
                },
            )
            .await
            .unwrap();
        for message in messages {
            assert!(seen_streams.insert(message.stream_name.clone()), "no stream should appear in two partitions");
            member_of.insert(message.stream_name, member);
        }
    }

    assert_eq!(seen_streams.len(), streams.len());
    assert_eq!(member_of[&streams[0]], member_of[&streams[1]], "compound ids share a cardinal id");
    assert_eq!(member_of[&streams[0]], member_of[&streams[2]]);
}

/// Spec §8 scenario 4 ("correlation"): `category.get(correlation = X)`
/// returns only messages whose `metadata.correlation_stream_name`'s
/// category is `X`, in global-position order.
pub async fn correlation_filter_matches_by_category(store: &dyn Store, ns: &str) {
    let category = unique_stream("task").replace('-', "_");
    let stream1 = format!("{category}-1");
    let stream2 = format!("{category}-2");
    let stream3 = format!("{category}-3");

    store
        .write(
            ns,
            &stream1,
            NewMessage::new("Started", json!({})).with_metadata(json!({"correlation_stream_name": "workflow-42"})),
            WriteOpts::default(),
        )
        .await
        .unwrap();
    store
        .write(
            ns,
            &stream2,
            NewMessage::new("Started", json!({})).with_metadata(json!({"correlation_stream_name": "workflow-7"})),
            WriteOpts::default(),
        )
        .await
        .unwrap();
    store
        .write(
            ns,
            &stream3,
            NewMessage::new("Started", json!({})).with_metadata(json!({"correlation_stream_name": "process-1"})),
            WriteOpts::default(),
        )
        .await
        .unwrap();

    let matched = store
        .get_category(
            ns,
            &category,
            CategoryOpts { correlation: Some("workflow".to_string()), ..CategoryOpts::default() },
        )
        .await
        .unwrap();

    assert_eq!(matched.len(), 2);
    assert_eq!(matched[0].stream_name, stream1);
    assert_eq!(matched[1].stream_name, stream2);
    assert!(matched[0].global_position < matched[1].global_position);
}

/// Spec §8 invariant 5 ("round trip"): `data`/`metadata` survive a
/// write/read cycle exactly, including unicode, nesting, null, booleans,
/// and the integer/float numeric distinction.
pub async fn round_trip_preserves_json_exactly(store: &dyn Store, ns: &str) {
    let stream = unique_stream("doc");
    let data = json!({
        "int": 42,
        "float": 3.5,
        "unicode": "héllo wörld 日本語",
        "nested": {"a": [1, 2, {"b": null}]},
        "flag": true,
        "nothing": null,
    });
    let metadata = json!({"correlation_stream_name": "workflow-1", "trace": [1, 2, 3]});

    store
        .write(
            ns,
            &stream,
            NewMessage::new("Created", data.clone()).with_metadata(metadata.clone()),
            WriteOpts::default(),
        )
        .await
        .unwrap();

    let messages = store.get_stream(ns, &stream, StreamOpts::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, data);
    assert_eq!(messages[0].metadata, Some(metadata));
}

/// Spec §8 invariant 6 ("import round trip"): importing previously exported
/// tuples reproduces identical `(stream, position, global_position, data,
/// metadata, time, id)` — here checked directly against `import_batch`
/// rather than a full export/import HTTP round trip.
pub async fn import_preserves_positions_and_advances_counter(store: &dyn Store, ns: &str) {
    let stream = unique_stream("ledger");
    let id = Uuid::new_v4();
    let time = Utc::now();

    store
        .import_batch(
            ns,
            vec![ImportRecord {
                id,
                stream_name: stream.clone(),
                msg_type: "Imported".to_string(),
                position: 0,
                global_position: 47,
                data: json!({"amount": 5}),
                metadata: None,
                time,
            }],
        )
        .await
        .unwrap();

    let messages = store.get_stream(ns, &stream, StreamOpts::default()).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    assert_eq!(messages[0].position, 0);
    assert_eq!(messages[0].global_position, 47);
    assert_eq!(messages[0].data, json!({"amount": 5}));

    // A subsequent normal write must land strictly after the imported
    // global position, never colliding with it.
    let (_, next_gp) = store
        .write(ns, &stream, NewMessage::new("Appended", json!({})), WriteOpts::default())
        .await
        .unwrap();
    assert!(next_gp >= 48, "global counter must advance past the imported position, got {next_gp}");
}

/// Spec §8 "Duplicate global position on import fails the whole batch."
pub async fn import_batch_rejects_position_collision_atomically(store: &dyn Store, ns: &str) {
    let stream = unique_stream("ledger");
    store
        .import_batch(
            ns,
            vec![ImportRecord {
                id: Uuid::new_v4(),
                stream_name: stream.clone(),
                msg_type: "Imported".to_string(),
                position: 0,
                global_position: 100,
                data: json!({}),
                metadata: None,
                time: Utc::now(),
            }],
        )
        .await
        .unwrap();

    let fresh_stream = unique_stream("ledger");
    let err = store
        .import_batch(
            ns,
            vec![
                ImportRecord {
                    id: Uuid::new_v4(),
                    stream_name: fresh_stream.clone(),
                    msg_type: "Imported".to_string(),
                    position: 0,
                    global_position: 200,
                    data: json!({}),
                    metadata: None,
                    time: Utc::now(),
                },
                ImportRecord {
                    id: Uuid::new_v4(),
                    stream_name: fresh_stream.clone(),
                    msg_type: "Imported".to_string(),
                    position: 1,
                    global_position: 100, // collides with the first import above
                    data: json!({}),
                    metadata: None,
                    time: Utc::now(),
                },
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, msgvault::Error::PositionExists { global_position: 100 }));

    // The whole batch must have rolled back: the first record of the
    // colliding batch must not be visible either.
    let messages = store.get_stream(ns, &fresh_stream, StreamOpts::default()).await.unwrap();
    assert!(messages.is_empty(), "a rejected import batch must not partially commit");
}

/// Boundary behaviors from spec §8: empty batch returns empty, reads past
/// the stream end return empty, an oversized batch size returns everything
/// available.
pub async fn boundary_reads_are_well_defined(store: &dyn Store, ns: &str) {
    let stream = unique_stream("widget");
    store
        .write(ns, &stream, NewMessage::new("Created", json!({})), WriteOpts::default())
        .await
        .unwrap();

    let past_end = store
        .get_stream(ns, &stream, StreamOpts { position: 1000, global_position: None, batch_size: 1000 })
        .await
        .unwrap();
    assert!(past_end.is_empty());

    let empty_batch = store
        .get_stream(ns, &stream, StreamOpts { position: 0, global_position: None, batch_size: 0 })
        .await
        .unwrap();
    assert!(empty_batch.is_empty());

    let oversized_batch = store
        .get_stream(ns, &stream, StreamOpts { position: 0, global_position: None, batch_size: 10_000_000 })
        .await
        .unwrap();
    assert_eq!(oversized_batch.len(), 1);
}

/// `list_streams`' cursor is exclusive and never repeats an entry across
/// pages.
pub async fn list_streams_cursor_is_exclusive_and_paginates(store: &dyn Store, ns: &str) {
    let prefix = unique_stream("catalog");
    let mut streams = Vec::new();
    for i in 0..5 {
        let stream = format!("{prefix}-{i}");
        store
            .write(ns, &stream, NewMessage::new("Listed", json!({})), WriteOpts::default())
            .await
            .unwrap();
        streams.push(stream);
    }
    streams.sort();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .list_streams(
                ns,
                ListStreamsOpts { prefix: Some(prefix.clone()), limit: 2, cursor: cursor.clone() },
            )
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        for item in &page {
            assert!(!seen.contains(&item.stream), "cursor pagination must not repeat a stream");
            seen.push(item.stream.clone());
        }
        cursor = Some(page.last().unwrap().stream.clone());
    }

    assert_eq!(seen, streams);
}

fn unique_stream(category: &str) -> String {
    format!("{category}-{}", Uuid::new_v4().simple())
}
