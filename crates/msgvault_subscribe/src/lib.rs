//! The subscription/poke dispatcher (C6, spec §4.8): one actor per
//! namespace, tracking subscriber scope, consumer-group filter, and
//! catch-up/live delivery state.

mod dispatcher;
mod error;
mod scope;

pub use dispatcher::{DispatcherHandle, Subscription, SubscriptionEvent};
pub use error::{Error, Result};
pub use scope::{Poke, Scope, SubscribeRequest};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use msgvault::{
        CategoryOpts, ImportRecord, ListCategoriesItem, ListStreamsItem, ListStreamsOpts, Message,
        NamespaceInfo, NewMessage, Store, StreamOpts, WriteOpts,
    };
    use tokio::sync::Mutex;

    use super::*;

    /// An in-memory `Store` stub, just enough to drive the dispatcher's
    /// catch-up path in isolation from any real backend.
    struct FakeStore {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn write(
            &self,
            _namespace: &str,
            _stream_name: &str,
            _message: NewMessage,
            _opts: WriteOpts,
        ) -> msgvault::Result<(i64, i64)> {
            unimplemented!()
        }

        async fn get_stream(
            &self,
            _namespace: &str,
            stream_name: &str,
            opts: StreamOpts,
        ) -> msgvault::Result<Vec<Message>> {
            let messages = self.messages.lock().await;
            Ok(messages
                .iter()
                .filter(|m| m.stream_name == stream_name && m.position >= opts.position)
                .cloned()
                .collect())
        }

        async fn get_category(
            &self,
            _namespace: &str,
            category: &str,
            opts: CategoryOpts,
        ) -> msgvault::Result<Vec<Message>> {
            let messages = self.messages.lock().await;
            Ok(messages
                .iter()
                .filter(|m| m.category() == category && m.global_position >= opts.position)
                .cloned()
                .collect())
        }

        async fn get_all(
            &self,
            _namespace: &str,
            opts: CategoryOpts,
        ) -> msgvault::Result<Vec<Message>> {
            let messages = self.messages.lock().await;
            Ok(messages
                .iter()
                .filter(|m| m.global_position >= opts.position)
                .cloned()
                .collect())
        }

        async fn last(
            &self,
            _namespace: &str,
            _stream_name: &str,
            _msg_type: Option<&str>,
        ) -> msgvault::Result<Option<Message>> {
            unimplemented!()
        }

        async fn version(&self, _namespace: &str, _stream_name: &str) -> msgvault::Result<Option<i64>> {
            unimplemented!()
        }

        async fn list_streams(
            &self,
            _namespace: &str,
            _opts: ListStreamsOpts,
        ) -> msgvault::Result<Vec<ListStreamsItem>> {
            unimplemented!()
        }

        async fn list_categories(&self, _namespace: &str) -> msgvault::Result<Vec<ListCategoriesItem>> {
            unimplemented!()
        }

        async fn import_batch(&self, _namespace: &str, _messages: Vec<ImportRecord>) -> msgvault::Result<()> {
            unimplemented!()
        }

        async fn namespace_create(&self, _namespace: &str) -> msgvault::Result<String> {
            unimplemented!()
        }

        async fn namespace_delete(&self, _namespace: &str) -> msgvault::Result<()> {
            unimplemented!()
        }

        async fn namespace_info(&self, _namespace: &str) -> msgvault::Result<NamespaceInfo> {
            unimplemented!()
        }

        async fn close(&self) -> msgvault::Result<()> {
            Ok(())
        }
    }

    fn message(stream: &str, position: i64, global_position: i64) -> Message {
        Message {
            id: uuid::Uuid::new_v4(),
            stream_name: stream.to_string(),
            msg_type: "Tested".to_string(),
            position,
            global_position,
            data: serde_json::json!({}),
            metadata: None,
            time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn catch_up_then_ready_then_live() {
        let store = Arc::new(FakeStore {
            messages: Mutex::new(vec![message("acct-1", 0, 1), message("acct-1", 1, 2)]),
        });
        let dispatcher = DispatcherHandle::new(store, "acme");

        let mut subscription = dispatcher
            .subscribe(SubscribeRequest::new(Scope::Stream("acct-1".into())))
            .await
            .unwrap();

        assert_eq!(
            subscription.recv().await,
            Some(SubscriptionEvent::Poke(Poke {
                stream: "acct-1".into(),
                position: 0,
                global_position: 1,
            }))
        );
        assert_eq!(
            subscription.recv().await,
            Some(SubscriptionEvent::Poke(Poke {
                stream: "acct-1".into(),
                position: 1,
                global_position: 2,
            }))
        );
        assert_eq!(subscription.recv().await, Some(SubscriptionEvent::Ready));

        dispatcher
            .notify(Poke {
                stream: "acct-1".into(),
                position: 2,
                global_position: 3,
            })
            .await
            .unwrap();

        assert_eq!(
            subscription.recv().await,
            Some(SubscriptionEvent::Poke(Poke {
                stream: "acct-1".into(),
                position: 2,
                global_position: 3,
            }))
        );
    }

    #[tokio::test]
    async fn stream_scope_ignores_other_streams() {
        let store = Arc::new(FakeStore {
            messages: Mutex::new(vec![]),
        });
        let dispatcher = DispatcherHandle::new(store, "acme");

        let mut subscription = dispatcher
            .subscribe(SubscribeRequest::new(Scope::Stream("acct-1".into())))
            .await
            .unwrap();
        assert_eq!(subscription.recv().await, Some(SubscriptionEvent::Ready));

        dispatcher
            .notify(Poke {
                stream: "acct-2".into(),
                position: 0,
                global_position: 1,
            })
            .await
            .unwrap();
        dispatcher
            .notify(Poke {
                stream: "acct-1".into(),
                position: 0,
                global_position: 2,
            })
            .await
            .unwrap();

        assert_eq!(
            subscription.recv().await,
            Some(SubscriptionEvent::Poke(Poke {
                stream: "acct-1".into(),
                position: 0,
                global_position: 2,
            }))
        );
    }

    #[tokio::test]
    async fn closing_a_subscription_stops_further_pokes() {
        let store = Arc::new(FakeStore {
            messages: Mutex::new(vec![]),
        });
        let dispatcher = DispatcherHandle::new(store, "acme");

        let subscription = dispatcher
            .subscribe(SubscribeRequest::new(Scope::Stream("acct-1".into())))
            .await
            .unwrap();
        drop(subscription);

        // Give the actor a chance to observe the closed channel on notify.
        dispatcher
            .notify(Poke {
                stream: "acct-1".into(),
                position: 0,
                global_position: 1,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consumer_group_filters_live_pokes() {
        let store = Arc::new(FakeStore {
            messages: Mutex::new(vec![]),
        });
        let dispatcher = DispatcherHandle::new(store, "acme");

        let request = SubscribeRequest::new(Scope::Category("acct".into()))
            .with_consumer_group(msgvault::ConsumerGroup { member: 0, size: 2 });
        let mut subscription = dispatcher.subscribe(request).await.unwrap();
        assert_eq!(subscription.recv().await, Some(SubscriptionEvent::Ready));

        for i in 0..20i64 {
            dispatcher
                .notify(Poke {
                    stream: format!("acct-{i}"),
                    position: 0,
                    global_position: i + 1,
                })
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        while let Ok(Some(SubscriptionEvent::Poke(poke))) =
            tokio::time::timeout(std::time::Duration::from_millis(50), subscription.recv()).await
        {
            received.push(poke);
        }

        assert!(!received.is_empty());
        for poke in &received {
            assert!(msgvault::assigned_to_member(&poke.stream, 0, 2));
        }
    }

    #[tokio::test]
    async fn stream_scope_rejects_live_pokes_below_start_position() {
        // Subscribing past the stream's current end means catch-up replays
        // nothing (`delivered_up_to` stays `None`), so the start-position
        // filter has to be enforced on live pokes too, not only derived from
        // what catch-up already skipped.
        let store = Arc::new(FakeStore {
            messages: Mutex::new(vec![]),
        });
        let dispatcher = DispatcherHandle::new(store, "acme");

        let request = SubscribeRequest::new(Scope::Stream("acct-1".into())).with_position(5);
        let mut subscription = dispatcher.subscribe(request).await.unwrap();
        assert_eq!(subscription.recv().await, Some(SubscriptionEvent::Ready));

        dispatcher
            .notify(Poke {
                stream: "acct-1".into(),
                position: 3,
                global_position: 1,
            })
            .await
            .unwrap();
        dispatcher
            .notify(Poke {
                stream: "acct-1".into(),
                position: 5,
                global_position: 2,
            })
            .await
            .unwrap();

        assert_eq!(
            subscription.recv().await,
            Some(SubscriptionEvent::Poke(Poke {
                stream: "acct-1".into(),
                position: 5,
                global_position: 2,
            }))
        );
    }
}
