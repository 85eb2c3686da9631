use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::message::{Message, NewMessage};
use crate::Result;

/// Options recognized by [`Store::write`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOpts {
    pub id: Option<Uuid>,
    /// `Some(-1)` asserts the stream must not yet exist.
    pub expected_version: Option<i64>,
}

/// Options recognized by [`Store::get_stream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOpts {
    pub position: i64,
    pub global_position: Option<i64>,
    pub batch_size: i64,
}

impl Default for StreamOpts {
    fn default() -> Self {
        StreamOpts {
            position: 0,
            global_position: None,
            batch_size: 1000,
        }
    }
}

impl StreamOpts {
    /// Clamps `batch_size` to the documented bounds: `-1` means unlimited,
    /// anything else is capped at 10000.
    pub fn effective_batch_size(&self) -> Option<i64> {
        match self.batch_size {
            -1 => None,
            n => Some(n.min(10_000)),
        }
    }
}

/// A consumer-group filter: `member` of `size`, `0 <= member < size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub member: i64,
    pub size: i64,
}

/// Options recognized by [`Store::get_category`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryOpts {
    pub position: i64,
    pub global_position: Option<i64>,
    pub batch_size: i64,
    pub correlation: Option<String>,
    pub consumer_group: Option<ConsumerGroup>,
}

impl Default for CategoryOpts {
    fn default() -> Self {
        CategoryOpts {
            position: 1,
            global_position: None,
            batch_size: 1000,
            correlation: None,
            consumer_group: None,
        }
    }
}

impl CategoryOpts {
    pub fn effective_batch_size(&self) -> Option<i64> {
        match self.batch_size {
            -1 => None,
            n => Some(n.min(10_000)),
        }
    }

    /// The effective starting global position: `position`, unless
    /// `global_position` is set, in which case that wins.
    pub fn starting_global_position(&self) -> i64 {
        self.global_position.unwrap_or(self.position)
    }
}

/// Options recognized by [`Store::list_streams`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListStreamsOpts {
    pub prefix: Option<String>,
    pub limit: i64,
    pub cursor: Option<String>,
}

impl ListStreamsOpts {
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            100
        } else {
            self.limit.min(1000)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListStreamsItem {
    pub stream: String,
    pub version: i64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListCategoriesItem {
    pub category: String,
    pub stream_count: i64,
    pub message_count: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceInfo {
    pub id: String,
    pub message_count: i64,
    pub stream_count: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A message presented to [`Store::import_batch`] with its positions
/// already assigned, as read back from an export.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportRecord {
    pub id: Uuid,
    pub stream_name: String,
    pub msg_type: String,
    pub position: i64,
    pub global_position: i64,
    pub data: Value,
    pub metadata: Option<Value>,
    pub time: DateTime<Utc>,
}

/// The backend-agnostic contract exposed to the HTTP/RPC layer (spec §4.4).
/// Implemented identically by the Postgres stored-procedure backend, the
/// embedded SQLite backend, and the sled ordered-KV backend; the HTTP layer
/// is generic over `Store` and never branches on which backend is live.
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes one message to `stream_name`, returning its assigned
    /// `(position, global_position)`.
    async fn write(
        &self,
        namespace: &str,
        stream_name: &str,
        message: NewMessage,
        opts: WriteOpts,
    ) -> Result<(i64, i64)>;

    async fn get_stream(
        &self,
        namespace: &str,
        stream_name: &str,
        opts: StreamOpts,
    ) -> Result<Vec<Message>>;

    async fn get_category(
        &self,
        namespace: &str,
        category: &str,
        opts: CategoryOpts,
    ) -> Result<Vec<Message>>;

    /// Reads every message in `namespace` in global order, starting at
    /// `opts.starting_global_position()`. Backs the subscription
    /// dispatcher's catch-up phase for `all`-scoped subscriptions; there is
    /// no corresponding RPC method, since `all` subscriptions are served
    /// entirely by C6 (spec §4.8), not by a store-level read.
    async fn get_all(&self, namespace: &str, opts: CategoryOpts) -> Result<Vec<Message>>;

    /// The most recent message in `stream_name`, optionally filtered to the
    /// most recent of a given `msg_type`.
    async fn last(
        &self,
        namespace: &str,
        stream_name: &str,
        msg_type: Option<&str>,
    ) -> Result<Option<Message>>;

    /// The highest position in `stream_name`, or `None` if it is empty.
    async fn version(&self, namespace: &str, stream_name: &str) -> Result<Option<i64>>;

    async fn list_streams(
        &self,
        namespace: &str,
        opts: ListStreamsOpts,
    ) -> Result<Vec<ListStreamsItem>>;

    async fn list_categories(&self, namespace: &str) -> Result<Vec<ListCategoriesItem>>;

    /// Inserts `messages` preserving their supplied positions and global
    /// positions. Atomic: either every message lands, or none do.
    async fn import_batch(&self, namespace: &str, messages: Vec<ImportRecord>) -> Result<()>;

    /// Bootstraps a namespace's physical storage (schema / file / directory)
    /// and returns the opaque location recorded by the namespace registry.
    async fn namespace_create(&self, namespace: &str) -> Result<String>;

    /// Tears down a namespace's physical storage. Idempotent from the
    /// backend's point of view — the registry is the source of truth for
    /// whether the namespace still exists.
    async fn namespace_delete(&self, namespace: &str) -> Result<()>;

    /// Best-effort summary used by `ns.info`.
    async fn namespace_info(&self, namespace: &str) -> Result<NamespaceInfo>;

    /// Releases any open handles. Called once at process shutdown.
    async fn close(&self) -> Result<()>;
}
