//! The embedded-relational `Store` backend (C5b): one SQLite database per
//! namespace, a process-local mutex serializing writers.

mod backend;
mod error;
mod lock_registry;
mod migrations;

pub use backend::SqliteBackend;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use msgvault::{CategoryOpts, ConsumerGroup, NewMessage, Store, StreamOpts, WriteOpts};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_namespace() -> (TempDir, SqliteBackend, &'static str) {
        let dir = TempDir::new().expect("tempdir");
        let backend = SqliteBackend::new(dir.path(), true);
        backend.namespace_create("acme").await.expect("namespace_create");
        (dir, backend, "acme")
    }

    #[tokio::test]
    async fn write_then_read_back_a_stream() {
        let (_dir, backend, ns) = open_namespace().await;

        let (pos, gp) = backend
            .write(ns, "account-123", NewMessage::new("Opened", json!({"balance": 0})), WriteOpts::default())
            .await
            .unwrap();
        assert_eq!(pos, 0);
        assert!(gp >= 0);

        let messages = backend.get_stream(ns, "account-123", StreamOpts::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type, "Opened");
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
                WriteOpts { expected_version: Some(5), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, msgvault::Error::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn category_read_filters_by_consumer_group_in_host_code() {
        let (_dir, backend, ns) = open_namespace().await;
        for id in ["1", "2", "3", "4"] {
            backend
                .write(ns, &format!("account-{id}"), NewMessage::new("Opened", json!({})), WriteOpts::default())
                .await
                .unwrap();
        }

        let member0 = backend
            .get_category(
                ns,
                "account",
                CategoryOpts { consumer_group: Some(ConsumerGroup { member: 0, size: 2 }), ..Default::default() },
            )
            .await
            .unwrap();
        let member1 = backend
            .get_category(
                ns,
                "account",
                CategoryOpts { consumer_group: Some(ConsumerGroup { member: 1, size: 2 }), ..Default::default() },
            )
            .await
            .unwrap();

        assert_eq!(member0.len() + member1.len(), 4);
    }

    #[tokio::test]
    async fn list_categories_counts_streams_and_messages() {
        let (_dir, backend, ns) = open_namespace().await;
        backend.write(ns, "account-1", NewMessage::new("Opened", json!({})), WriteOpts::default()).await.unwrap();
        backend.write(ns, "account-1", NewMessage::new("Deposited", json!({})), WriteOpts::default()).await.unwrap();
        backend.write(ns, "account-2", NewMessage::new("Opened", json!({})), WriteOpts::default()).await.unwrap();

        let categories = backend.list_categories(ns).await.unwrap();
        let account = categories.iter().find(|c| c.category == "account").unwrap();
        assert_eq!(account.stream_count, 2);
        assert_eq!(account.message_count, 3);
    }

    #[tokio::test]
    async fn namespace_delete_removes_the_database_file() {
        let dir = TempDir::new().expect("tempdir");
        let backend = SqliteBackend::new(dir.path(), false);
        backend.namespace_create("acme").await.unwrap();
        backend
            .write("acme", "account-1", NewMessage::new("Opened", json!({})), WriteOpts::default())
            .await
            .unwrap();

        backend.namespace_delete("acme").await.unwrap();

        let err = backend
            .get_stream("acme", "account-1", StreamOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, msgvault::Error::NamespaceNotFound(_)));
    }
}
