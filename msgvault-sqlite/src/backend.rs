//! The embedded-relational `Store` backend (C5b, spec §4.6): one SQLite
//! database per namespace, lazily opened behind a read/write-locked handle
//! map, writes serialized by a process-local per-namespace mutex instead of
//! a category-level advisory lock. Consumer-group and correlation filtering
//! happen in host code after the base query, since SQLite exposes no
//! `hash_64`-equivalent function to embed in SQL the way C5a does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msgvault::{
    CategoryOpts, ImportRecord, ListCategoriesItem, ListStreamsItem, ListStreamsOpts, Message,
    NamespaceInfo, NewMessage, Store, StreamOpts, WriteOpts,
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result as SqliteResult};
use crate::lock_registry::NamespaceLockRegistry;
use crate::migrations::SQLITE_MIGRATIONS;

#[derive(FromRow)]
struct MessageRow {
    id: String,
    stream_name: String,
    #[sqlx(rename = "type")]
    msg_type: String,
    position: i64,
    global_position: i64,
    data: String,
    metadata: Option<String>,
    time: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> SqliteResult<Message> {
        Ok(Message {
            id: Uuid::parse_str(&self.id).map_err(|_| {
                Error::Database(sqlx::Error::Decode("invalid id".into()))
            })?,
            stream_name: self.stream_name,
            msg_type: self.msg_type,
            position: self.position,
            global_position: self.global_position,
            data: serde_json::from_str(&self.data).unwrap_or(Value::Null),
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .unwrap_or(None),
            time: self.time,
        })
    }
}

struct NamespaceHandle {
    pool: SqlitePool,
    path: PathBuf,
}

pub struct SqliteBackend {
    base_dir: PathBuf,
    test_mode: bool,
    handles: RwLock<HashMap<String, Arc<NamespaceHandle>>>,
    locks: NamespaceLockRegistry,
}

impl SqliteBackend {
    pub fn new(base_dir: impl AsRef<Path>, test_mode: bool) -> Self {
        SqliteBackend {
            base_dir: base_dir.as_ref().to_path_buf(),
            test_mode,
            handles: RwLock::new(HashMap::new()),
            locks: NamespaceLockRegistry::new(),
        }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        let schema = msgvault_registry::sanitize_schema_name(namespace);
        self.base_dir.join(format!("{schema}.sqlite3"))
    }

    async fn connect(&self, path: &Path, create: bool) -> SqliteResult<SqlitePool> {
        let options = if self.test_mode {
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("msgvault");
            SqliteConnectOptions::new()
                .filename(format!("file:{name}?mode=memory&cache=shared"))
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(create)
        };

        let min_connections = if self.test_mode { 1 } else { 0 };
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(min_connections)
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    async fn apply_migrations(&self, pool: &SqlitePool) -> SqliteResult<()> {
        for migration in SQLITE_MIGRATIONS {
            sqlx::query(migration.sql).execute(pool).await?;
        }
        Ok(())
    }

    async fn open(&self, namespace: &str) -> SqliteResult<Arc<NamespaceHandle>> {
        if let Some(handle) = self.handles.read().await.get(namespace) {
            return Ok(Arc::clone(handle));
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(namespace) {
            return Ok(Arc::clone(handle));
        }

        let path = self.path_for(namespace);
        if !self.test_mode && !path.exists() {
            return Err(Error::NamespaceNotFound(namespace.to_string()));
        }

        let pool = self.connect(&path, false).await?;
        let handle = Arc::new(NamespaceHandle { pool, path });
        handles.insert(namespace.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn category_of(stream_name: &str) -> String {
        msgvault::stream_name::category(stream_name).to_string()
    }
}

#[async_trait]
impl Store for SqliteBackend {
    async fn write(
        &self,
        namespace: &str,
        stream_name: &str,
        message: NewMessage,
        opts: WriteOpts,
    ) -> msgvault::Result<(i64, i64)> {
        let handle = self.open(namespace).await?;
        let lock = self.locks.get(namespace);
        let _guard = lock.lock().await;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT max(position) FROM messages WHERE stream_name = ?")
                .bind(stream_name)
                .fetch_one(&handle.pool)
                .await
                .map_err(Error::from)?;

        if let Some(expected) = opts.expected_version {
            let expected = if expected == -1 { None } else { Some(expected) };
            if expected != current {
                return Err(Error::VersionConflict {
                    expected: opts.expected_version.unwrap(),
                    actual: current,
                }
                .into());
            }
        }

        let id = message.id.unwrap_or_else(Uuid::new_v4);
        let position = current.unwrap_or(-1) + 1;
        let data = serde_json::to_string(&message.data).map_err(|e| {
            msgvault::Error::InvalidJson(e.to_string())
        })?;
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?;
        let time = Utc::now();

        let result = sqlx::query(
            "INSERT INTO messages (id, stream_name, type, position, data, metadata, time) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(stream_name)
        .bind(&message.msg_type)
        .bind(position)
        .bind(&data)
        .bind(&metadata)
        .bind(time)
        .execute(&handle.pool)
        .await
        .map_err(Error::from)?;

        let global_position = result.last_insert_rowid();

        info!(namespace, stream_name, position, global_position, "message written");

        Ok((position, global_position))
    }

    async fn get_stream(
        &self,
        namespace: &str,
        stream_name: &str,
        opts: StreamOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE stream_name = ? AND position >= ? \
             AND (? IS NULL OR global_position >= ?) ORDER BY position LIMIT ?",
        )
        .bind(stream_name)
        .bind(opts.position)
        .bind(opts.global_position)
        .bind(opts.global_position)
        .bind(opts.effective_batch_size().unwrap_or(-1))
        .fetch_all(&handle.pool)
        .await
        .map_err(Error::from)?;

        rows.into_iter().map(|r| r.into_message().map_err(Into::into)).collect()
    }

    async fn get_category(
        &self,
        namespace: &str,
        category: &str,
        opts: CategoryOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages \
             WHERE ((instr(stream_name, '-') = 0 AND stream_name = ?1) \
                 OR (instr(stream_name, '-') > 0 AND substr(stream_name, 1, instr(stream_name, '-') - 1) = ?1)) \
               AND global_position >= ?2 \
             ORDER BY global_position",
        )
        .bind(category)
        .bind(opts.starting_global_position())
        .fetch_all(&handle.pool)
        .await
        .map_err(Error::from)?;

        let messages: Vec<Message> = rows
            .into_iter()
            .map(|r| r.into_message())
            .collect::<SqliteResult<_>>()?;

        Ok(filter_and_truncate(messages, &opts))
    }

    async fn get_all(&self, namespace: &str, opts: CategoryOpts) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE global_position >= ? ORDER BY global_position",
        )
        .bind(opts.starting_global_position())
        .fetch_all(&handle.pool)
        .await
        .map_err(Error::from)?;

        let messages: Vec<Message> = rows
            .into_iter()
            .map(|r| r.into_message())
            .collect::<SqliteResult<_>>()?;

        Ok(filter_and_truncate(messages, &opts))
    }

    async fn last(
        &self,
        namespace: &str,
        stream_name: &str,
        msg_type: Option<&str>,
    ) -> msgvault::Result<Option<Message>> {
        let handle = self.open(namespace).await?;

        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE stream_name = ? AND (? IS NULL OR type = ?) \
             ORDER BY position DESC LIMIT 1",
        )
        .bind(stream_name)
        .bind(msg_type)
        .bind(msg_type)
        .fetch_optional(&handle.pool)
        .await
        .map_err(Error::from)?;

        row.map(|r| r.into_message().map_err(Into::into)).transpose()
    }

    async fn version(&self, namespace: &str, stream_name: &str) -> msgvault::Result<Option<i64>> {
        let handle = self.open(namespace).await?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT max(position) FROM messages WHERE stream_name = ?")
                .bind(stream_name)
                .fetch_one(&handle.pool)
                .await
                .map_err(Error::from)?;

        Ok(version)
    }

    async fn list_streams(
        &self,
        namespace: &str,
        opts: ListStreamsOpts,
    ) -> msgvault::Result<Vec<ListStreamsItem>> {
        let handle = self.open(namespace).await?;
        let prefix = opts.prefix.unwrap_or_default();

        let rows = sqlx::query(
            "SELECT stream_name, max(position) AS version, max(time) AS last_activity \
             FROM messages WHERE stream_name LIKE ?1 || '%' AND (?2 IS NULL OR stream_name > ?2) \
             GROUP BY stream_name ORDER BY stream_name LIMIT ?3",
        )
        .bind(&prefix)
        .bind(&opts.cursor)
        .bind(opts.effective_limit())
        .fetch_all(&handle.pool)
        .await
        .map_err(Error::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(ListStreamsItem {
                    stream: row.try_get("stream_name").map_err(Error::from)?,
                    version: row.try_get("version").map_err(Error::from)?,
                    last_activity: row.try_get("last_activity").map_err(Error::from)?,
                })
            })
            .collect()
    }

    async fn list_categories(&self, namespace: &str) -> msgvault::Result<Vec<ListCategoriesItem>> {
        let handle = self.open(namespace).await?;

        let rows = sqlx::query("SELECT stream_name, count(*) AS message_count FROM messages GROUP BY stream_name")
            .fetch_all(&handle.pool)
            .await
            .map_err(Error::from)?;

        let mut counts: HashMap<String, (i64, i64)> = HashMap::new();
        for row in rows {
            let stream_name: String = row.try_get("stream_name").map_err(Error::from)?;
            let message_count: i64 = row.try_get("message_count").map_err(Error::from)?;
            let category = Self::category_of(&stream_name);
            let entry = counts.entry(category).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += message_count;
        }

        let mut items: Vec<ListCategoriesItem> = counts
            .into_iter()
            .map(|(category, (stream_count, message_count))| ListCategoriesItem {
                category,
                stream_count,
                message_count,
            })
            .collect();
        items.sort_by(|a, b| a.category.cmp(&b.category));

        Ok(items)
    }

    async fn import_batch(&self, namespace: &str, messages: Vec<ImportRecord>) -> msgvault::Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let handle = self.open(namespace).await?;
        let lock = self.locks.get(namespace);
        let _guard = lock.lock().await;

        let mut tx = handle.pool.begin().await.map_err(Error::from)?;

        for record in &messages {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE global_position = ?)",
            )
            .bind(record.global_position)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::from)?;
            if exists {
                return Err(Error::PositionExists {
                    global_position: record.global_position,
                }
                .into());
            }
        }

        for record in &messages {
            let data = serde_json::to_string(&record.data)
                .map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?;
            let metadata = record
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?;

            sqlx::query(
                "INSERT INTO messages (id, stream_name, type, position, global_position, data, metadata, time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(&record.stream_name)
            .bind(&record.msg_type)
            .bind(record.position)
            .bind(record.global_position)
            .bind(&data)
            .bind(&metadata)
            .bind(record.time)
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        }

        tx.commit().await.map_err(Error::from)?;

        info!(namespace, imported = messages.len(), "import batch committed");

        Ok(())
    }

    async fn namespace_create(&self, namespace: &str) -> msgvault::Result<String> {
        let path = self.path_for(namespace);
        let mut handles = self.handles.write().await;
        if handles.contains_key(namespace) || (!self.test_mode && path.exists()) {
            return Err(Error::NamespaceExists(namespace.to_string()).into());
        }

        let pool = self.connect(&path, true).await?;
        self.apply_migrations(&pool).await?;

        let location = path.to_string_lossy().into_owned();
        handles.insert(namespace.to_string(), Arc::new(NamespaceHandle { pool, path }));

        info!(namespace, location = %location, "namespace created");

        Ok(location)
    }

    async fn namespace_delete(&self, namespace: &str) -> msgvault::Result<()> {
        let mut handles = self.handles.write().await;
        let path = match handles.remove(namespace) {
            Some(handle) => {
                handle.pool.close().await;
                handle.path.clone()
            }
            None => self.path_for(namespace),
        };
        drop(handles);

        if !self.test_mode && path.exists() {
            std::fs::remove_file(&path).map_err(Error::from)?;
        }

        info!(namespace, "namespace deleted");

        Ok(())
    }

    async fn namespace_info(&self, namespace: &str) -> msgvault::Result<NamespaceInfo> {
        let handle = self.open(namespace).await?;

        let row = sqlx::query(
            "SELECT count(*) AS message_count, count(DISTINCT stream_name) AS stream_count, \
             max(time) AS last_activity FROM messages",
        )
        .fetch_one(&handle.pool)
        .await
        .map_err(Error::from)?;

        Ok(NamespaceInfo {
            id: namespace.to_string(),
            message_count: row.try_get("message_count").map_err(Error::from)?,
            stream_count: row.try_get("stream_count").map_err(Error::from)?,
            last_activity: row.try_get("last_activity").map_err(Error::from)?,
        })
    }

    async fn close(&self) -> msgvault::Result<()> {
        let handles = self.handles.read().await;
        for handle in handles.values() {
            handle.pool.close().await;
        }
        Ok(())
    }
}

/// Applies consumer-group and correlation filters host-side, then truncates
/// to the effective batch size — the order spec §4.6 requires since the
/// filters aren't expressible in SQLite SQL.
fn filter_and_truncate(messages: Vec<Message>, opts: &CategoryOpts) -> Vec<Message> {
    let limit = opts.effective_batch_size();
    let mut results = Vec::new();

    for message in messages {
        if let Some(group) = opts.consumer_group {
            if !msgvault::assigned_to_member(&message.stream_name, group.member as u64, group.size as u64) {
                continue;
            }
        }
        if let Some(correlation) = &opts.correlation {
            if message.correlation_category() != Some(correlation.as_str()) {
                continue;
            }
        }

        results.push(message);
        if limit.is_some_and(|limit| results.len() as i64 >= limit) {
            break;
        }
    }

    results
}
