//! Runs the shared backend-agnostic contract suite (`msgvault_testkit`)
//! against a live Postgres instance.
//!
//! Unlike the sled and SQLite backends, this one needs a real server, so
//! every test is skipped (with a printed notice, not a failure) unless
//! `MSGVAULT_TEST_DATABASE_URL` is set — the same opt-in convention
//! `thalo-rs-message-db`'s own integration tests use for a `DATABASE_URL`.

use msgvault::Store;
use msgvault_postgres::PostgresBackend;
use uuid::Uuid;

async fn open_namespace() -> Option<(PostgresBackend, String)> {
    let url = match std::env::var("MSGVAULT_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: MSGVAULT_TEST_DATABASE_URL not set");
            return None;
        }
    };

    let backend = PostgresBackend::connect(&url).await.expect("connect");
    let ns = format!("contract_{}", Uuid::new_v4().simple());
    backend.namespace_create(&ns).await.expect("namespace_create");
    Some((backend, ns))
}

macro_rules! contract_test {
    ($name:ident) => {
        #[tokio::test]
        async fn $name() {
            let Some((backend, ns)) = open_namespace().await else {
                return;
            };
            msgvault_testkit::$name(&backend, &ns).await;
            backend.namespace_delete(&ns).await.expect("namespace_delete");
        }
    };
}

contract_test!(sequential_stream_is_gapless);
contract_test!(global_position_is_monotonic_across_streams);
contract_test!(expected_version_minus_one_requires_empty_stream);
contract_test!(consumer_group_partitions_streams);
contract_test!(correlation_filter_matches_by_category);
contract_test!(round_trip_preserves_json_exactly);
contract_test!(import_preserves_positions_and_advances_counter);
contract_test!(import_batch_rejects_position_collision_atomically);
contract_test!(boundary_reads_are_well_defined);
contract_test!(list_streams_cursor_is_exclusive_and_paginates);

#[tokio::test]
async fn optimistic_concurrency_exactly_one_writer_wins() {
    let Some((backend, ns)) = open_namespace().await else {
        return;
    };
    msgvault_testkit::optimistic_concurrency_exactly_one_writer_wins(&backend, &ns, 8).await;
    backend.namespace_delete(&ns).await.expect("namespace_delete");
}
