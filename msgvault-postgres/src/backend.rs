//! The relational-procedure `Store` backend (C5a, spec §4.5): one schema per
//! namespace, writes and reads routed through the schema's own stored
//! procedures (`migrations::PROCEDURE_MIGRATIONS`), category-level
//! concurrency enforced by a transactional Postgres advisory lock rather
//! than a process-local mutex.
//!
//! Grounded on `thalo-rs-message-db`'s `MessageDb` client
//! (`database/client.rs`): same procedure-call shape
//! (`write_message`/`get_stream_messages`/`get_category_messages`/
//! `get_last_stream_message`/`stream_version`), adapted from message-db's
//! fixed `message_store` schema to a schema-per-namespace layout and from
//! compile-time-checked `sqlx::query_scalar!`/`query_as!` macros (which
//! require a `DATABASE_URL` at build time against one fixed schema) to
//! runtime `sqlx::query`/`query_as`, since the schema identifier is only
//! known per namespace at request time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msgvault::{
    CategoryOpts, ImportRecord, ListCategoriesItem, ListStreamsItem, ListStreamsOpts, Message,
    NamespaceInfo, NewMessage, Store, StreamOpts, WriteOpts,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result as PgResult};
use crate::migrations::PROCEDURE_MIGRATIONS;

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    stream_name: String,
    #[sqlx(rename = "type")]
    msg_type: String,
    position: i64,
    global_position: i64,
    data: Value,
    metadata: Option<Value>,
    time: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            stream_name: row.stream_name,
            msg_type: row.msg_type,
            position: row.position,
            global_position: row.global_position,
            data: row.data,
            metadata: row.metadata,
            time: row.time,
        }
    }
}

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> PgResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(PostgresBackend { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        PostgresBackend { pool }
    }

    fn schema(namespace: &str) -> String {
        msgvault_registry::sanitize_schema_name(namespace)
    }

    async fn schema_exists(&self, schema: &str) -> PgResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn require_namespace(&self, namespace: &str, schema: &str) -> PgResult<()> {
        if !self.schema_exists(schema).await? {
            return Err(Error::NamespaceNotFound(namespace.to_string()));
        }
        Ok(())
    }

    async fn apply_migrations(&self, schema: &str) -> PgResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".msgvault_schema_version (\
             version INTEGER PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        ))
        .execute(&self.pool)
        .await?;

        let mut combined: Vec<_> = msgvault_registry::NAMESPACE_MIGRATIONS
            .iter()
            .chain(PROCEDURE_MIGRATIONS.iter())
            .collect();
        combined.sort_by_key(|m| m.version);

        for migration in combined {
            let already_applied: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM \"{schema}\".msgvault_schema_version WHERE version = $1)"
            ))
            .bind(migration.version as i32)
            .fetch_one(&self.pool)
            .await?;
            if already_applied {
                continue;
            }

            let rendered = msgvault_registry::render_namespace_migration(migration.sql, schema);
            let mut tx = self.pool.begin().await?;
            sqlx::query(&rendered)
                .execute(&mut *tx)
                .await
                .map_err(|err| Error::Migration(migration.name, err))?;
            sqlx::query(&format!(
                "INSERT INTO \"{schema}\".msgvault_schema_version (version) VALUES ($1)"
            ))
            .bind(migration.version as i32)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresBackend {
    async fn write(
        &self,
        namespace: &str,
        stream_name: &str,
        message: NewMessage,
        opts: WriteOpts,
    ) -> msgvault::Result<(i64, i64)> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let result = sqlx::query(&format!(
            "SELECT * FROM \"{schema}\".write_message($1, $2, $3, $4, $5, $6)"
        ))
        .bind(message.id.unwrap_or_else(Uuid::new_v4))
        .bind(stream_name)
        .bind(&message.msg_type)
        .bind(&message.data)
        .bind(&message.metadata)
        .bind(opts.expected_version)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(err) => {
                return Err(self
                    .version_conflict_error(&schema, stream_name, opts.expected_version, err)
                    .await)
            }
        };

        let position: i64 = row.try_get("position").map_err(Error::from)?;
        let global_position: i64 = row.try_get("global_position").map_err(Error::from)?;

        info!(namespace, stream_name, position, global_position, "message written");

        Ok((position, global_position))
    }

    async fn get_stream(
        &self,
        namespace: &str,
        stream_name: &str,
        opts: StreamOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT * FROM \"{schema}\".get_stream_messages($1, $2, $3, $4)"
        ))
        .bind(stream_name)
        .bind(opts.position)
        .bind(opts.global_position)
        .bind(opts.effective_batch_size())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn get_category(
        &self,
        namespace: &str,
        category: &str,
        opts: CategoryOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;
        self.query_category(&schema, category, opts).await
    }

    async fn get_all(&self, namespace: &str, opts: CategoryOpts) -> msgvault::Result<Vec<Message>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT * FROM \"{schema}\".messages m \
             WHERE m.global_position >= $1 \
               AND ($2::bigint IS NULL OR mod(abs(\"{schema}\".hash_64(\"{schema}\".cardinal_id(m.stream_name))), $2) = $3) \
               AND ($4::text IS NULL OR \"{schema}\".category(m.metadata ->> 'correlation_stream_name') = $4) \
             ORDER BY m.global_position \
             LIMIT (CASE WHEN $5::bigint IS NULL THEN NULL ELSE $5 END)"
        ))
        .bind(opts.starting_global_position())
        .bind(opts.consumer_group.map(|g| g.size))
        .bind(opts.consumer_group.map(|g| g.member))
        .bind(&opts.correlation)
        .bind(opts.effective_batch_size())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn last(
        &self,
        namespace: &str,
        stream_name: &str,
        msg_type: Option<&str>,
    ) -> msgvault::Result<Option<Message>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT * FROM \"{schema}\".get_last_stream_message($1, $2)"
        ))
        .bind(stream_name)
        .bind(msg_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(row.map(Message::from))
    }

    async fn version(&self, namespace: &str, stream_name: &str) -> msgvault::Result<Option<i64>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let version: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT * FROM \"{schema}\".stream_version($1)"
        ))
        .bind(stream_name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(version)
    }

    async fn list_streams(
        &self,
        namespace: &str,
        opts: ListStreamsOpts,
    ) -> msgvault::Result<Vec<ListStreamsItem>> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let prefix = opts.prefix.unwrap_or_default();
        let rows = sqlx::query(&format!(
            "SELECT stream_name, max(position) AS version, max(time) AS last_activity \
             FROM \"{schema}\".messages \
             WHERE stream_name LIKE $1 || '%' \
               AND ($2::text IS NULL OR stream_name > $2) \
             GROUP BY stream_name \
             ORDER BY stream_name \
             LIMIT $3"
        ))
        .bind(&prefix)
        .bind(&opts.cursor)
        .bind(opts.effective_limit())
        .fetch_all(&self.pool)
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
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let rows = sqlx::query(&format!(
            "SELECT \"{schema}\".category(stream_name) AS category, \
                    count(DISTINCT stream_name) AS stream_count, \
                    count(*) AS message_count \
             FROM \"{schema}\".messages \
             GROUP BY category \
             ORDER BY category"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(ListCategoriesItem {
                    category: row.try_get("category").map_err(Error::from)?,
                    stream_count: row.try_get("stream_count").map_err(Error::from)?,
                    message_count: row.try_get("message_count").map_err(Error::from)?,
                })
            })
            .collect()
    }

    async fn import_batch(&self, namespace: &str, messages: Vec<ImportRecord>) -> msgvault::Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        for record in &messages {
            let exists: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM \"{schema}\".messages WHERE global_position = $1)"
            ))
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
            sqlx::query(&format!(
                "INSERT INTO \"{schema}\".messages \
                 (id, stream_name, type, position, global_position, data, metadata, time) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(record.id)
            .bind(&record.stream_name)
            .bind(&record.msg_type)
            .bind(record.position)
            .bind(record.global_position)
            .bind(&record.data)
            .bind(&record.metadata)
            .bind(record.time)
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        }

        sqlx::query(&format!(
            "SELECT setval(pg_get_serial_sequence('\"{schema}\".messages', 'global_position'), \
             (SELECT max(global_position) FROM \"{schema}\".messages))"
        ))
        .execute(&mut *tx)
        .await
        .map_err(Error::from)?;

        tx.commit().await.map_err(Error::from)?;

        info!(namespace, imported = messages.len(), "import batch committed");

        Ok(())
    }

    async fn namespace_create(&self, namespace: &str) -> msgvault::Result<String> {
        let schema = Self::schema(namespace);
        if self.schema_exists(&schema).await? {
            return Err(Error::NamespaceExists(namespace.to_string()).into());
        }

        sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;

        self.apply_migrations(&schema).await?;

        info!(namespace, schema, "namespace created");

        Ok(schema)
    }

    async fn namespace_delete(&self, namespace: &str) -> msgvault::Result<()> {
        let schema = Self::schema(namespace);
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE"))
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;

        info!(namespace, "namespace deleted");

        Ok(())
    }

    async fn namespace_info(&self, namespace: &str) -> msgvault::Result<NamespaceInfo> {
        let schema = Self::schema(namespace);
        self.require_namespace(namespace, &schema).await?;

        let row = sqlx::query(&format!(
            "SELECT count(*) AS message_count, \
                    count(DISTINCT stream_name) AS stream_count, \
                    max(time) AS last_activity \
             FROM \"{schema}\".messages"
        ))
        .fetch_one(&self.pool)
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
        self.pool.close().await;
        Ok(())
    }
}

impl PostgresBackend {
    async fn query_category(
        &self,
        schema: &str,
        category: &str,
        opts: CategoryOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT * FROM \"{schema}\".get_category_messages($1, $2, $3, $4, $5, $6)"
        ))
        .bind(category)
        .bind(opts.starting_global_position())
        .bind(opts.effective_batch_size())
        .bind(&opts.correlation)
        .bind(opts.consumer_group.map(|g| g.member))
        .bind(opts.consumer_group.map(|g| g.size))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

impl PostgresBackend {
    /// `write_message` raises `SQLSTATE M2001` on an expected-version
    /// mismatch; everything else is a plain database error. Postgres has no
    /// structured way to carry `actual` back out of a `RAISE EXCEPTION`, so
    /// on conflict this re-reads the stream's current version for the error
    /// payload rather than parsing it out of the exception message.
    async fn version_conflict_error(
        &self,
        schema: &str,
        stream_name: &str,
        expected: Option<i64>,
        err: sqlx::Error,
    ) -> msgvault::Error {
        let is_conflict = matches!(
            &err,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("M2001")
        );
        if !is_conflict {
            return Error::from(err).into();
        }

        let actual: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT * FROM \"{schema}\".stream_version($1)"
        ))
        .bind(stream_name)
        .fetch_one(&self.pool)
        .await
        .unwrap_or(None);

        Error::VersionConflict {
            expected: expected.unwrap_or(-1),
            actual,
        }
        .into()
    }
}
