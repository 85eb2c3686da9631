//! Runs the shared backend-agnostic contract suite (`msgvault_testkit`)
//! against a fresh sled database per test, the way `thalo`'s aggregate tests
//! share one fixture module instead of hand-rolling assertions per backend.

use msgvault_sled::SledBackend;
use tempfile::TempDir;

async fn open_namespace() -> (TempDir, SledBackend, &'static str) {
    let dir = TempDir::new().expect("tempdir");
    let backend = SledBackend::new(dir.path());
    backend.namespace_create("acme").await.expect("namespace_create");
    (dir, backend, "acme")
}

macro_rules! contract_test {
    ($name:ident) => {
        #[tokio::test]
        async fn $name() {
            let (_dir, backend, ns) = open_namespace().await;
            msgvault_testkit::$name(&backend, ns).await;
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
    let (_dir, backend, ns) = open_namespace().await;
    msgvault_testkit::optimistic_concurrency_exactly_one_writer_wins(&backend, ns, 8).await;
}
