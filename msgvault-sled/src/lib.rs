//! The embedded, dependency-free ordered-KV `Store` backend (C5c).
//!
//! Unlike `msgvault-postgres`/`msgvault-sqlite`, there is no server or
//! relational schema: every namespace is its own `sled` database under a
//! configured base directory, addressed through the key families documented
//! in `keys`.

mod backend;
mod error;
mod keys;
mod lock_registry;

pub use backend::SledBackend;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use msgvault::{CategoryOpts, ConsumerGroup, NewMessage, Store, StreamOpts, WriteOpts};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_namespace() -> (TempDir, SledBackend, &'static str) {
        let dir = TempDir::new().expect("tempdir");
        let backend = SledBackend::new(dir.path());
        backend.namespace_create("acme").await.expect("namespace_create");
        (dir, backend, "acme")
    }

    #[tokio::test]
    async fn write_then_read_back_a_stream() {
        let (_dir, backend, ns) = open_namespace().await;

        let (pos, gp) = backend
            .write(
                ns,
                "account-123",
                NewMessage::new("Opened", json!({"balance": 0})),
                WriteOpts::default(),
            )
            .await
            .unwrap();
        assert_eq!((pos, gp), (0, 1));

        let messages = backend
            .get_stream(ns, "account-123", StreamOpts::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type, "Opened");
        assert_eq!(messages[0].position, 0);
        assert_eq!(messages[0].global_position, 1);
    }

    #[tokio::test]
    async fn expected_version_conflict_is_rejected() {
        let (_dir, backend, ns) = open_namespace().await;
        backend
            .write(ns, "account-123", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();

        let err = backend
            .write(
                ns,
                "account-123",
                NewMessage::new("Closed", json!({})),
                WriteOpts {
                    expected_version: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, msgvault::Error::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn category_read_respects_consumer_group_partitioning() {
        let (_dir, backend, ns) = open_namespace().await;
        for id in ["1", "2", "3", "4"] {
            backend
                .write(
                    ns,
                    &format!("account-{id}"),
                    NewMessage::new("Opened", json!({})),
                    WriteOpts::default(),
                )
                .await
                .unwrap();
        }

        let member0 = backend
            .get_category(
                ns,
                "account",
                CategoryOpts {
                    consumer_group: Some(ConsumerGroup { member: 0, size: 2 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let member1 = backend
            .get_category(
                ns,
                "account",
                CategoryOpts {
                    consumer_group: Some(ConsumerGroup { member: 1, size: 2 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(member0.len() + member1.len(), 4);
        let all = backend.get_category(ns, "account", CategoryOpts::default()).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn list_categories_tracks_stream_and_message_counts() {
        let (_dir, backend, ns) = open_namespace().await;
        backend
            .write(ns, "account-1", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();
        backend
            .write(ns, "account-1", NewMessage::new("Deposited", json!({})), WriteOpts::default())
            .await
            .unwrap();
        backend
            .write(ns, "account-2", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();

        let categories = backend.list_categories(ns).await.unwrap();
        let account = categories.iter().find(|c| c.category == "account").unwrap();
        assert_eq!(account.stream_count, 2);
        assert_eq!(account.message_count, 3);
    }

    #[tokio::test]
    async fn namespace_delete_removes_the_database_directory() {
        let (_dir, backend, ns) = open_namespace().await;
        backend
            .write(ns, "account-1", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();

        backend.namespace_delete(ns).await.unwrap();
        let err = backend
            .get_stream(ns, "account-1", StreamOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, msgvault::Error::NamespaceNotFound(_)));
    }

    #[tokio::test]
    async fn import_batch_rejects_a_collision_with_an_existing_global_position() {
        let (_dir, backend, ns) = open_namespace().await;
        backend
            .write(ns, "account-1", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();

        let err = backend
            .import_batch(
                ns,
                vec![msgvault::ImportRecord {
                    id: uuid::Uuid::new_v4(),
                    stream_name: "account-2".to_string(),
                    msg_type: "Opened".to_string(),
                    position: 0,
                    global_position: 1,
                    data: json!({}),
                    metadata: None,
                    time: chrono::Utc::now(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, msgvault::Error::PositionExists { .. }));
    }
}
