//! Streaming ingest (C7, spec §4.9): buffers an `impl Stream` of
//! [`ImportRecord`]s up to 1 000 at a time and commits each batch through
//! [`Store::import_batch`], the way `thalo::event_store::EventStore`'s
//! `EventStream` associated type is consumed one item at a time but acted on
//! in bulk by its callers.

use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use msgvault::{ImportRecord, Result, Store};

use crate::validate::validate;

/// The streaming HTTP import layer buffers up to this many records before
/// calling `import_batch` (spec §4.9).
pub const MAX_BATCH_SIZE: usize = 1000;

/// Emitted after each committed batch, carrying the cumulative imported
/// count and the highest global position committed so far — the `{imported,
/// gpos}` progress event in spec §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportProgress {
    pub imported: u64,
    pub global_position: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    pub elapsed: Duration,
}

/// Drains `records` into `namespace`, batching up to [`MAX_BATCH_SIZE`] per
/// `import_batch` call and invoking `on_progress` once per committed batch.
/// The first record that fails validation, or the first batch that fails to
/// commit, aborts the stream — spec §4.9's "errors abort the stream".
pub async fn import_stream<S>(
    store: &dyn Store,
    namespace: &str,
    mut records: S,
    mut on_progress: impl FnMut(ImportProgress),
) -> Result<ImportSummary>
where
    S: Stream<Item = Result<ImportRecord>> + Unpin,
{
    let start = Instant::now();
    let mut imported: u64 = 0;
    let mut batch: Vec<ImportRecord> = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(record) = records.next().await {
        let record = record?;
        validate(&record)?;
        batch.push(record);

        if batch.len() >= MAX_BATCH_SIZE {
            imported += flush(store, namespace, &mut batch, &mut on_progress).await?;
        }
    }

    if !batch.is_empty() {
        imported += flush(store, namespace, &mut batch, &mut on_progress).await?;
    }

    Ok(ImportSummary {
        imported,
        elapsed: start.elapsed(),
    })
}

async fn flush(
    store: &dyn Store,
    namespace: &str,
    batch: &mut Vec<ImportRecord>,
    on_progress: &mut impl FnMut(ImportProgress),
) -> Result<u64> {
    let records = std::mem::take(batch);
    let count = records.len() as u64;
    let max_global_position = records
        .iter()
        .map(|r| r.global_position)
        .max()
        .unwrap_or_default();

    store.import_batch(namespace, records).await?;

    on_progress(ImportProgress {
        imported: count,
        global_position: max_global_position,
    });

    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use msgvault::{
        CategoryOpts, ListCategoriesItem, ListStreamsItem, ListStreamsOpts, Message, NamespaceInfo,
        NewMessage, StreamOpts, WriteOpts,
    };
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<ImportRecord>>>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn write(
            &self,
            _: &str,
            _: &str,
            _: NewMessage,
            _: WriteOpts,
        ) -> Result<(i64, i64)> {
            unimplemented!()
        }
        async fn get_stream(&self, _: &str, _: &str, _: StreamOpts) -> Result<Vec<Message>> {
            unimplemented!()
        }
        async fn get_category(&self, _: &str, _: &str, _: CategoryOpts) -> Result<Vec<Message>> {
            unimplemented!()
        }
        async fn get_all(&self, _: &str, _: CategoryOpts) -> Result<Vec<Message>> {
            unimplemented!()
        }
        async fn last(&self, _: &str, _: &str, _: Option<&str>) -> Result<Option<Message>> {
            unimplemented!()
        }
        async fn version(&self, _: &str, _: &str) -> Result<Option<i64>> {
            unimplemented!()
        }
        async fn list_streams(&self, _: &str, _: ListStreamsOpts) -> Result<Vec<ListStreamsItem>> {
            unimplemented!()
        }
        async fn list_categories(&self, _: &str) -> Result<Vec<ListCategoriesItem>> {
            unimplemented!()
        }
        async fn import_batch(&self, _: &str, messages: Vec<ImportRecord>) -> Result<()> {
            self.batches.lock().await.push(messages);
            Ok(())
        }
        async fn namespace_create(&self, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn namespace_delete(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn namespace_info(&self, _: &str) -> Result<NamespaceInfo> {
            unimplemented!()
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn record(global_position: i64) -> ImportRecord {
        ImportRecord {
            id: Uuid::new_v4(),
            stream_name: "acct-1".into(),
            msg_type: "Deposited".into(),
            position: global_position,
            global_position,
            data: serde_json::json!({}),
            metadata: None,
            time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn batches_at_the_configured_size() {
        let store = Arc::new(RecordingStore::default());
        let records = (0..(MAX_BATCH_SIZE as i64 + 1)).map(|i| Ok(record(i)));
        let stream = tokio_stream::iter(records);

        let mut progress_events = Vec::new();
        let summary = import_stream(store.as_ref(), "acme", stream, |p| progress_events.push(p))
            .await
            .unwrap();

        assert_eq!(summary.imported, MAX_BATCH_SIZE as u64 + 1);
        assert_eq!(progress_events.len(), 2);
        assert_eq!(progress_events[0].imported, MAX_BATCH_SIZE as u64);
        assert_eq!(progress_events[1].imported, 1);

        let batches = store.batches.lock().await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), MAX_BATCH_SIZE);
        assert_eq!(batches[1].len(), 1);
    }

    #[tokio::test]
    async fn invalid_record_aborts_before_any_batch_commits() {
        let store = Arc::new(RecordingStore::default());
        let mut bad = record(1);
        bad.stream_name = String::new();
        let records = vec![Ok(record(0)), Ok(bad)];
        let stream = tokio_stream::iter(records);

        let result = import_stream(store.as_ref(), "acme", stream, |_| {}).await;
        assert!(result.is_err());
        assert!(store.batches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_imports_nothing() {
        let store = Arc::new(RecordingStore::default());
        let stream = tokio_stream::iter(Vec::<Result<ImportRecord>>::new());

        let summary = import_stream(store.as_ref(), "acme", stream, |_| {}).await.unwrap();
        assert_eq!(summary.imported, 0);
        assert!(store.batches.lock().await.is_empty());
    }
}
