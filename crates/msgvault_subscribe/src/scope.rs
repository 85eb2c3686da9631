use msgvault::ConsumerGroup;

/// What a subscription listens to (spec §4.8).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Stream(String),
    Category(String),
    All,
}

/// A minimal change notification: no payload, just enough for the client to
/// decide whether to re-read the stream (spec §6 "Poke").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Poke {
    pub stream: String,
    pub position: i64,
    pub global_position: i64,
}

/// A request to open a subscription. `position` is interpreted the same way
/// the HTTP transport's `position` query parameter is: a stream position
/// when `scope` is [`Scope::Stream`], a global position otherwise (spec §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub scope: Scope,
    pub position: i64,
    pub consumer_group: Option<ConsumerGroup>,
}

impl SubscribeRequest {
    pub fn new(scope: Scope) -> Self {
        let position = match scope {
            Scope::Stream(_) => 0,
            Scope::Category(_) | Scope::All => 1,
        };
        SubscribeRequest {
            scope,
            position,
            consumer_group: None,
        }
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    pub fn with_consumer_group(mut self, consumer_group: ConsumerGroup) -> Self {
        self.consumer_group = Some(consumer_group);
        self
    }
}
