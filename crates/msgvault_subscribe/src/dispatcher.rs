//! The per-namespace subscription dispatcher (C6, spec §4.8).
//!
//! Structured like `BroadcasterHandle`/`Broadcaster` in
//! `thalo_runtime::broadcaster`: a handle wrapping an `mpsc::Sender` fronts a
//! single actor task that owns all subscriber state, and out-of-order
//! deliveries are reassembled with a `HashMap<global_position, Poke>` buffer
//! plus a "next expected" cursor. The teacher buffers once, globally, because
//! it has one broadcast channel; this dispatcher buffers once *per
//! subscriber*, because each subscription has its own scope, consumer-group
//! filter, and catch-up starting point, so no two subscribers necessarily
//! agree on what "next" means.

use std::collections::HashMap;
use std::sync::Arc;

use msgvault::{CategoryOpts, ConsumerGroup, Message, StreamOpts};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::scope::{Poke, Scope, SubscribeRequest};

/// Event stream handed to a subscriber. [`SubscriptionEvent::Ready`] is
/// emitted exactly once, after catch-up completes and before any live poke,
/// so callers (and tests) can synchronize on "the dispatcher has primed this
/// subscription" (spec §4.8).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Ready,
    Poke(Poke),
}

/// An open subscription. Dropping it — or simply letting it go out of scope
/// when the client disconnects — closes the channel, which the dispatcher
/// observes as a failed send and uses to retire the subscriber. No explicit
/// close message is needed; this mirrors the crate's general rule that
/// cancellation is future drop, not a distinct error path.
pub struct Subscription {
    receiver: mpsc::Receiver<SubscriptionEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.recv().await
    }
}

#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherMsg>,
}

impl DispatcherHandle {
    /// Spawns a dispatcher actor owning subscriptions for one namespace.
    /// `store` is used only for the catch-up read at subscription creation.
    pub fn new(store: Arc<dyn msgvault::Store>, namespace: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel(256);
        let actor = Dispatcher {
            store,
            namespace: namespace.into(),
            subscribers: Vec::new(),
            next_id: 0,
        };
        tokio::spawn(run_dispatcher(receiver, actor));
        DispatcherHandle { sender }
    }

    /// Signals that `poke`'s message has committed. Called from the write
    /// path once the backend's atomic commit returns (spec §3 data flow).
    pub async fn notify(&self, poke: Poke) -> Result<()> {
        self.sender
            .send(DispatcherMsg::Notify(poke))
            .await
            .map_err(|_| Error::ActorStopped)
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription> {
        let (reply, recv) = oneshot::channel();
        self.sender
            .send(DispatcherMsg::Subscribe { request, reply })
            .await
            .map_err(|_| Error::ActorStopped)?;
        recv.await.map_err(|_| Error::ActorStopped)?
    }
}

enum DispatcherMsg {
    Notify(Poke),
    Subscribe {
        request: SubscribeRequest,
        reply: oneshot::Sender<Result<Subscription>>,
    },
}

struct Subscriber {
    id: u64,
    scope: Scope,
    consumer_group: Option<ConsumerGroup>,
    /// The subscription's requested starting position. For `Scope::Stream`
    /// this is a stream `position`, not a global position (spec §4.8: "unless
    /// the scope is `stream` and `M.position < start_position`") — it must be
    /// enforced on live pokes too, not just during the catch-up read, since a
    /// subscription opened past the stream's current end has no catch-up
    /// messages to apply the filter to.
    start_position: i64,
    sender: mpsc::Sender<SubscriptionEvent>,
    /// Highest global position already delivered; `None` before anything has
    /// gone out. Enforces strictly increasing delivery (spec §4.8 "position
    /// monotonicity").
    delivered_up_to: Option<i64>,
    /// Live notifications received while catch-up is still in flight,
    /// buffered so nothing committed during priming is lost.
    pending: HashMap<i64, Poke>,
    caught_up: bool,
}

impl Subscriber {
    fn matches(&self, poke: &Poke) -> bool {
        let scope_matches = match &self.scope {
            Scope::Stream(name) => &poke.stream == name && poke.position >= self.start_position,
            Scope::Category(category) => {
                msgvault::stream_name::category(&poke.stream) == category.as_str()
            }
            Scope::All => true,
        };
        if !scope_matches {
            return false;
        }
        match self.consumer_group {
            Some(ConsumerGroup { member, size }) => {
                msgvault::assigned_to_member(&poke.stream, member as u64, size as u64)
            }
            None => true,
        }
    }
}

struct Dispatcher {
    store: Arc<dyn msgvault::Store>,
    namespace: String,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

async fn run_dispatcher(mut receiver: mpsc::Receiver<DispatcherMsg>, mut dispatcher: Dispatcher) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            DispatcherMsg::Notify(poke) => dispatcher.notify(poke).await,
            DispatcherMsg::Subscribe { request, reply } => {
                let res = dispatcher.subscribe(request).await;
                let _ = reply.send(res);
            }
        }
    }
}

impl Dispatcher {
    async fn notify(&mut self, poke: Poke) {
        let mut dead = Vec::new();

        for (idx, subscriber) in self.subscribers.iter_mut().enumerate() {
            if !subscriber.matches(&poke) {
                continue;
            }

            if !subscriber.caught_up {
                // Catch-up hasn't replayed up to this point yet; buffer so
                // the flush at the end of catch-up delivers it in order.
                subscriber.pending.insert(poke.global_position, poke.clone());
                continue;
            }

            if subscriber.delivered_up_to.is_some_and(|last| poke.global_position <= last) {
                continue; // already delivered during catch-up or out of order
            }

            if subscriber
                .sender
                .send(SubscriptionEvent::Poke(poke.clone()))
                .await
                .is_err()
            {
                dead.push(idx);
                continue;
            }
            subscriber.delivered_up_to = Some(poke.global_position);
        }

        for idx in dead.into_iter().rev() {
            let subscriber = self.subscribers.swap_remove(idx);
            debug!(subscriber = subscriber.id, "subscriber disconnected");
        }
    }

    async fn subscribe(&mut self, request: SubscribeRequest) -> Result<Subscription> {
        let id = self.next_id;
        self.next_id += 1;

        let (sender, receiver) = mpsc::channel(64);

        // Register before the catch-up read so concurrent commits land in
        // `pending` instead of being lost between the read and registration.
        self.subscribers.push(Subscriber {
            id,
            scope: request.scope.clone(),
            consumer_group: request.consumer_group,
            start_position: request.position,
            sender: sender.clone(),
            delivered_up_to: None,
            pending: HashMap::new(),
            caught_up: false,
        });
        let idx = self.subscribers.len() - 1;

        let catch_up = match self.catch_up(&request).await {
            Ok(messages) => messages,
            Err(err) => {
                self.subscribers.remove(idx);
                return Err(err);
            }
        };

        let mut disconnected = false;

        for message in catch_up {
            if disconnected {
                break;
            }
            let subscriber = &mut self.subscribers[idx];
            if subscriber
                .delivered_up_to
                .is_some_and(|last| message.global_position <= last)
            {
                continue;
            }
            let poke = Poke {
                stream: message.stream_name.clone(),
                position: message.position,
                global_position: message.global_position,
            };
            if subscriber.sender.send(SubscriptionEvent::Poke(poke)).await.is_ok() {
                subscriber.delivered_up_to = Some(message.global_position);
            } else {
                disconnected = true;
            }
        }

        // Splice in anything buffered while catch-up was running, oldest
        // global position first (the teacher's `process_buffer` technique,
        // scoped to this one subscriber instead of the whole process).
        if !disconnected {
            let mut buffered: Vec<_> = self.subscribers[idx].pending.drain().collect();
            buffered.sort_by_key(|(gp, _)| *gp);
            for (gp, poke) in buffered {
                if disconnected {
                    break;
                }
                let subscriber = &mut self.subscribers[idx];
                if subscriber.delivered_up_to.is_some_and(|last| gp <= last) {
                    continue;
                }
                if subscriber.sender.send(SubscriptionEvent::Poke(poke)).await.is_ok() {
                    subscriber.delivered_up_to = Some(gp);
                } else {
                    disconnected = true;
                }
            }
        }

        if disconnected {
            self.subscribers.remove(idx);
            return Ok(Subscription { receiver });
        }

        self.subscribers[idx].caught_up = true;

        if sender.send(SubscriptionEvent::Ready).await.is_err() {
            self.subscribers.remove(idx);
            warn!(subscriber = id, "subscriber disconnected before ready sentinel");
        }

        Ok(Subscription { receiver })
    }

    async fn catch_up(&self, request: &SubscribeRequest) -> Result<Vec<Message>> {
        let messages = match &request.scope {
            Scope::Stream(name) => {
                self.store
                    .get_stream(
                        &self.namespace,
                        name,
                        StreamOpts {
                            position: request.position,
                            global_position: None,
                            batch_size: -1,
                        },
                    )
                    .await?
            }
            Scope::Category(category) => {
                self.store
                    .get_category(
                        &self.namespace,
                        category,
                        CategoryOpts {
                            position: request.position,
                            global_position: None,
                            batch_size: -1,
                            correlation: None,
                            consumer_group: request.consumer_group,
                        },
                    )
                    .await?
            }
            Scope::All => {
                self.store
                    .get_all(
                        &self.namespace,
                        CategoryOpts {
                            position: request.position,
                            global_position: None,
                            batch_size: -1,
                            correlation: None,
                            consumer_group: request.consumer_group,
                        },
                    )
                    .await?
            }
        };
        Ok(messages)
    }
}
