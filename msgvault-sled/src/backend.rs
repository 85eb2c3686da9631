//! The ordered-KV `Store` backend (C5c, spec §4.7): one sled database per
//! namespace, with `Stream`/`GlobalEventLog`/`IdGenerator`/`LockRegistry`
//! descended from `thalo_message_store`, but restructured around the spec's
//! explicit key families (`M`/`SI`/`CI`/`VI`/`GP`) instead of the teacher's
//! one-`Tree`-per-stream layout — that layout has no way to answer a
//! category read without scanning every stream's tree, which the spec's
//! `get_category`/consumer-group/correlation contracts require to be a
//! single ordered range scan.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use msgvault::{
    CategoryOpts, ImportRecord, ListCategoriesItem, ListStreamsItem, ListStreamsOpts, Message,
    NamespaceInfo, NewMessage, Store, StreamOpts, WriteOpts,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result as SledResult};
use crate::keys;
use crate::lock_registry::NamespaceLockRegistry;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct CategoryCounts {
    stream_count: i64,
    message_count: i64,
}

impl CategoryCounts {
    fn decode(bytes: &[u8]) -> SledResult<Self> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    fn encode(&self) -> SledResult<Vec<u8>> {
        Ok(serde_cbor::to_vec(self)?)
    }
}

struct NamespaceHandle {
    db: sled::Db,
    path: PathBuf,
}

/// One sled database per namespace, lazily opened and cached behind a
/// read/write-locked handle map (spec §4.6's "handle map guarded by a
/// read/write lock", generalized to this backend too).
pub struct SledBackend {
    base_dir: PathBuf,
    handles: RwLock<HashMap<String, Arc<NamespaceHandle>>>,
    locks: NamespaceLockRegistry,
}

impl SledBackend {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        SledBackend {
            base_dir: base_dir.as_ref().to_path_buf(),
            handles: RwLock::new(HashMap::new()),
            locks: NamespaceLockRegistry::new(),
        }
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.base_dir
            .join(msgvault_registry::sanitize_schema_name(namespace))
    }

    async fn open(&self, namespace: &str) -> SledResult<Arc<NamespaceHandle>> {
        if let Some(handle) = self.handles.read().await.get(namespace) {
            return Ok(Arc::clone(handle));
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(namespace) {
            return Ok(Arc::clone(handle));
        }

        let path = self.namespace_path(namespace);
        if !path.exists() {
            return Err(Error::NamespaceNotFound(namespace.to_string()));
        }

        let db = sled::open(&path)?;
        let handle = Arc::new(NamespaceHandle { db, path });
        handles.insert(namespace.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn decode_message(bytes: &[u8]) -> SledResult<Message> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    fn category_counts(tree: &sled::Tree, category: &str) -> SledResult<CategoryCounts> {
        match tree.get(keys::category_count_key(category))? {
            Some(bytes) => CategoryCounts::decode(&bytes),
            None => Ok(CategoryCounts::default()),
        }
    }
}

#[async_trait]
impl Store for SledBackend {
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
        let tree: &sled::Tree = &handle.db;

        let current = match tree.get(keys::version_index_key(stream_name))? {
            Some(v) => keys::decode_i64(&v),
            None => -1,
        };

        if let Some(expected) = opts.expected_version {
            if expected != current {
                let actual = if current == -1 { None } else { Some(current) };
                return Err(Error::VersionConflict { expected, actual }.into());
            }
        }

        let next_gp = match tree.get(keys::GLOBAL_COUNTER_KEY)? {
            Some(v) => keys::decode_i64(&v),
            // Global positions start at 1, matching the Postgres `BIGSERIAL`
            // and SQLite `AUTOINCREMENT` backends, so that a category read's
            // default starting position (spec §4.4, `position = 1`) sees the
            // very first message written to a namespace without callers
            // having to pass `position = 0` explicitly.
            None => 1,
        };
        let new_position = current + 1;
        let is_new_stream = current == -1;
        let category = msgvault::stream_name::category(stream_name).to_string();

        let record = Message {
            id: opts.id.unwrap_or_else(Uuid::new_v4),
            stream_name: stream_name.to_string(),
            msg_type: message.msg_type,
            position: new_position,
            global_position: next_gp,
            data: message.data,
            metadata: message.metadata,
            time: Utc::now(),
        };
        let encoded = serde_cbor::to_vec(&record).map_err(Error::from)?;

        let mut counts = Self::category_counts(tree, &category)?;
        counts.message_count += 1;
        if is_new_stream {
            counts.stream_count += 1;
        }

        let mut batch = sled::Batch::default();
        batch.insert(keys::message_key(next_gp), encoded);
        batch.insert(
            keys::stream_index_key(stream_name, new_position),
            keys::encode_i64(next_gp),
        );
        batch.insert(
            keys::category_index_key(&category, next_gp),
            stream_name.as_bytes().to_vec(),
        );
        batch.insert(keys::version_index_key(stream_name), keys::encode_i64(new_position));
        batch.insert(keys::GLOBAL_COUNTER_KEY.to_vec(), keys::encode_i64(next_gp + 1));
        batch.insert(keys::category_count_key(&category), counts.encode()?);

        tree.apply_batch(batch).map_err(Error::from)?;
        tree.flush_async().await.map_err(Error::from)?;

        info!(namespace, stream_name, position = new_position, global_position = next_gp, "message written");

        Ok((new_position, next_gp))
    }

    async fn get_stream(
        &self,
        namespace: &str,
        stream_name: &str,
        opts: StreamOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;
        let prefix = keys::stream_index_prefix(stream_name);
        let limit = opts.effective_batch_size();

        let mut results = Vec::new();
        for entry in tree.scan_prefix(&prefix) {
            if limit.is_some_and(|limit| results.len() as i64 >= limit) {
                break;
            }

            let (key, value) = entry.map_err(Error::from)?;
            let position = keys::decode_i64(&key[prefix.len()..]);
            if position < opts.position {
                continue;
            }
            let global_position = keys::decode_i64(&value);
            if opts
                .global_position
                .is_some_and(|start| global_position < start)
            {
                continue;
            }

            if let Some(bytes) = tree.get(keys::message_key(global_position)).map_err(Error::from)? {
                results.push(Self::decode_message(&bytes)?);
            }
        }

        Ok(results)
    }

    async fn get_category(
        &self,
        namespace: &str,
        category: &str,
        opts: CategoryOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;
        self.scan_category_index(tree, keys::category_index_prefix(category), opts)
    }

    async fn get_all(&self, namespace: &str, opts: CategoryOpts) -> msgvault::Result<Vec<Message>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;
        self.scan_message_log(tree, opts)
    }

    async fn last(
        &self,
        namespace: &str,
        stream_name: &str,
        msg_type: Option<&str>,
    ) -> msgvault::Result<Option<Message>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;

        if tree.get(keys::version_index_key(stream_name)).map_err(Error::from)?.is_none() {
            return Ok(None);
        }

        let prefix = keys::stream_index_prefix(stream_name);
        for entry in tree.scan_prefix(&prefix).rev() {
            let (_, value) = entry.map_err(Error::from)?;
            let global_position = keys::decode_i64(&value);
            let Some(bytes) = tree.get(keys::message_key(global_position)).map_err(Error::from)? else {
                continue;
            };
            let message = Self::decode_message(&bytes)?;
            match msg_type {
                Some(wanted) if message.msg_type != wanted => continue,
                _ => return Ok(Some(message)),
            }
        }

        Ok(None)
    }

    async fn version(&self, namespace: &str, stream_name: &str) -> msgvault::Result<Option<i64>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;
        Ok(tree
            .get(keys::version_index_key(stream_name))
            .map_err(Error::from)?
            .map(|v| keys::decode_i64(&v)))
    }

    async fn list_streams(
        &self,
        namespace: &str,
        opts: ListStreamsOpts,
    ) -> msgvault::Result<Vec<ListStreamsItem>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;
        let limit = opts.effective_limit();
        let prefix = opts.prefix.clone().unwrap_or_default();

        let mut results = Vec::new();
        for entry in tree.scan_prefix(keys::VERSION_INDEX_PREFIX) {
            let (key, value) = entry.map_err(Error::from)?;
            let stream = keys::version_index_stream_name(&key);
            if !stream.starts_with(&prefix) {
                continue;
            }
            if opts.cursor.as_deref().is_some_and(|cursor| stream.as_str() <= cursor) {
                continue;
            }

            let version = keys::decode_i64(&value);
            let global_position = tree
                .get(keys::stream_index_key(&stream, version))
                .map_err(Error::from)?
                .map(|v| keys::decode_i64(&v));
            let last_activity = match global_position {
                Some(gp) => tree
                    .get(keys::message_key(gp))
                    .map_err(Error::from)?
                    .map(|bytes| Self::decode_message(&bytes))
                    .transpose()?
                    .map(|m| m.time)
                    .unwrap_or_else(Utc::now),
                None => Utc::now(),
            };

            results.push(ListStreamsItem {
                stream,
                version,
                last_activity,
            });

            if results.len() as i64 >= limit {
                break;
            }
        }

        Ok(results)
    }

    async fn list_categories(&self, namespace: &str) -> msgvault::Result<Vec<ListCategoriesItem>> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;

        let mut results = Vec::new();
        for entry in tree.scan_prefix(keys::CATEGORY_COUNT_PREFIX) {
            let (key, value) = entry.map_err(Error::from)?;
            let category = keys::category_count_category_name(&key);
            let counts = CategoryCounts::decode(&value)?;
            results.push(ListCategoriesItem {
                category,
                stream_count: counts.stream_count,
                message_count: counts.message_count,
            });
        }

        Ok(results)
    }

    async fn import_batch(&self, namespace: &str, messages: Vec<ImportRecord>) -> msgvault::Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let handle = self.open(namespace).await?;
        let lock = self.locks.get(namespace);
        let _guard = lock.lock().await;
        let tree: &sled::Tree = &handle.db;

        for record in &messages {
            if tree
                .contains_key(keys::message_key(record.global_position))
                .map_err(Error::from)?
            {
                return Err(Error::PositionExists {
                    global_position: record.global_position,
                }
                .into());
            }
        }

        let mut batch = sled::Batch::default();
        let mut initial_versions: HashMap<String, Option<i64>> = HashMap::new();
        let mut counted_new_streams: HashSet<String> = HashSet::new();
        let mut running_versions: HashMap<String, i64> = HashMap::new();
        let mut category_counts: HashMap<String, CategoryCounts> = HashMap::new();
        let mut max_global_position = -1i64;

        for record in &messages {
            max_global_position = max_global_position.max(record.global_position);
            let stream = record.stream_name.clone();
            let category = msgvault::stream_name::category(&stream).to_string();

            let initial = *initial_versions.entry(stream.clone()).or_insert_with(|| {
                tree.get(keys::version_index_key(&stream))
                    .ok()
                    .flatten()
                    .map(|v| keys::decode_i64(&v))
            });
            let is_new_stream = initial.is_none() && counted_new_streams.insert(stream.clone());

            let message = Message {
                id: record.id,
                stream_name: stream.clone(),
                msg_type: record.msg_type.clone(),
                position: record.position,
                global_position: record.global_position,
                data: record.data.clone(),
                metadata: record.metadata.clone(),
                time: record.time,
            };
            batch.insert(
                keys::message_key(record.global_position),
                serde_cbor::to_vec(&message).map_err(Error::from)?,
            );
            batch.insert(
                keys::stream_index_key(&stream, record.position),
                keys::encode_i64(record.global_position),
            );
            batch.insert(
                keys::category_index_key(&category, record.global_position),
                stream.as_bytes().to_vec(),
            );

            let floor = running_versions
                .get(&stream)
                .copied()
                .unwrap_or_else(|| initial.unwrap_or(-1));
            running_versions.insert(stream.clone(), floor.max(record.position));

            let counts = category_counts
                .entry(category.clone())
                .or_insert_with(|| Self::category_counts(tree, &category).unwrap_or_default());
            counts.message_count += 1;
            if is_new_stream {
                counts.stream_count += 1;
            }
        }

        for (stream, version) in running_versions {
            batch.insert(keys::version_index_key(&stream), keys::encode_i64(version));
        }
        for (category, counts) in category_counts {
            batch.insert(keys::category_count_key(&category), counts.encode()?);
        }

        let current_gp = match tree.get(keys::GLOBAL_COUNTER_KEY).map_err(Error::from)? {
            Some(v) => keys::decode_i64(&v),
            None => 0,
        };
        let new_gp = current_gp.max(max_global_position + 1);
        batch.insert(keys::GLOBAL_COUNTER_KEY.to_vec(), keys::encode_i64(new_gp));

        tree.apply_batch(batch).map_err(Error::from)?;
        tree.flush_async().await.map_err(Error::from)?;

        info!(namespace, imported = messages.len(), "import batch committed");

        Ok(())
    }

    async fn namespace_create(&self, namespace: &str) -> msgvault::Result<String> {
        let path = self.namespace_path(namespace);
        let mut handles = self.handles.write().await;
        if handles.contains_key(namespace) || path.exists() {
            return Err(Error::NamespaceExists(namespace.to_string()).into());
        }

        let db = sled::open(&path).map_err(Error::from)?;
        let location = path.to_string_lossy().into_owned();
        handles.insert(
            namespace.to_string(),
            Arc::new(NamespaceHandle { db, path: path.clone() }),
        );

        info!(namespace, location = %location, "namespace created");

        Ok(location)
    }

    async fn namespace_delete(&self, namespace: &str) -> msgvault::Result<()> {
        let mut handles = self.handles.write().await;
        let path = match handles.remove(namespace) {
            Some(handle) => {
                let _ = handle.db.flush_async().await;
                handle.path.clone()
            }
            None => self.namespace_path(namespace),
        };
        drop(handles);

        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(Error::from)?;
        }

        info!(namespace, "namespace deleted");

        Ok(())
    }

    async fn namespace_info(&self, namespace: &str) -> msgvault::Result<NamespaceInfo> {
        let handle = self.open(namespace).await?;
        let tree: &sled::Tree = &handle.db;

        let message_count = tree.scan_prefix(b"M:").count() as i64;
        let stream_count = tree.scan_prefix(keys::VERSION_INDEX_PREFIX).count() as i64;
        let last_activity = tree
            .scan_prefix(b"M:")
            .last()
            .transpose()
            .map_err(Error::from)?
            .map(|(_, v)| Self::decode_message(&v))
            .transpose()?
            .map(|m| m.time);

        Ok(NamespaceInfo {
            id: namespace.to_string(),
            message_count,
            stream_count,
            last_activity,
        })
    }

    async fn close(&self) -> msgvault::Result<()> {
        let handles = self.handles.read().await;
        for handle in handles.values() {
            handle.db.flush_async().await.map_err(Error::from)?;
        }
        Ok(())
    }
}

impl SledBackend {
    fn scan_category_index(
        &self,
        tree: &sled::Tree,
        prefix: Vec<u8>,
        opts: CategoryOpts,
    ) -> msgvault::Result<Vec<Message>> {
        let start = opts.starting_global_position();
        let limit = opts.effective_batch_size();
        let mut results = Vec::new();

        for entry in tree.scan_prefix(&prefix) {
            if limit.is_some_and(|limit| results.len() as i64 >= limit) {
                break;
            }

            let (key, value) = entry.map_err(Error::from)?;
            let global_position = keys::decode_i64(&key[prefix.len()..]);
            if global_position < start {
                continue;
            }
            let stream_name = String::from_utf8_lossy(&value).into_owned();

            if let Some(group) = opts.consumer_group {
                if !msgvault::assigned_to_member(&stream_name, group.member as u64, group.size as u64) {
                    continue;
                }
            }

            let Some(bytes) = tree.get(keys::message_key(global_position)).map_err(Error::from)? else {
                continue;
            };
            let message = Self::decode_message(&bytes)?;

            if let Some(correlation) = &opts.correlation {
                if message.correlation_category() != Some(correlation.as_str()) {
                    continue;
                }
            }

            results.push(message);
        }

        Ok(results)
    }

    fn scan_message_log(&self, tree: &sled::Tree, opts: CategoryOpts) -> msgvault::Result<Vec<Message>> {
        let start = opts.starting_global_position();
        let limit = opts.effective_batch_size();
        let mut results = Vec::new();

        for entry in tree.scan_prefix(b"M:") {
            if limit.is_some_and(|limit| results.len() as i64 >= limit) {
                break;
            }

            let (_, value) = entry.map_err(Error::from)?;
            let message = Self::decode_message(&value)?;
            if message.global_position < start {
                continue;
            }

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
        }

        Ok(results)
    }
}
