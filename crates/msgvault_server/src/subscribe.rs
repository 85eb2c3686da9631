//! The `/subscribe` SSE transport (spec §6). Clients open exactly one of
//! `stream=`, `category=`, or `all=true`, plus an optional starting
//! `position` and `consumer`/`size` pair; the dispatcher (C6) does the
//! actual catch-up/live bookkeeping, this module only translates
//! [`SubscriptionEvent`]s onto the wire.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use msgvault_subscribe::{Scope, SubscribeRequest, SubscriptionEvent};
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_namespace;
use crate::error::ApiError;
use crate::rpc::validate_consumer_group;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    stream: Option<String>,
    category: Option<String>,
    all: Option<bool>,
    position: Option<i64>,
    consumer: Option<i64>,
    size: Option<i64>,
}

impl SubscribeQuery {
    fn into_scope(self) -> Result<(Scope, Option<i64>, Option<msgvault::ConsumerGroup>), ApiError> {
        let scope = match (self.stream, self.category, self.all) {
            (Some(stream), None, None) => Scope::Stream(stream),
            (None, Some(category), None) => Scope::Category(category),
            (None, None, Some(true)) => Scope::All,
            _ => {
                return Err(msgvault::Error::InvalidRequest(
                    "/subscribe requires exactly one of stream=, category=, all=true".into(),
                )
                .into())
            }
        };
        let consumer_group = match (self.consumer, self.size) {
            (Some(member), Some(size)) => Some(validate_consumer_group(member, size)?),
            _ => None,
        };
        Ok((scope, self.position, consumer_group))
    }
}

pub async fn handle_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let namespace = require_namespace(&state, &headers).await?;
    let (scope, position, consumer_group) = query.into_scope()?;

    let mut request = SubscribeRequest::new(scope);
    if let Some(position) = position {
        request = request.with_position(position);
    }
    if let Some(cg) = consumer_group {
        request = request.with_consumer_group(cg);
    }

    let dispatcher = state.dispatcher(&namespace);
    let mut subscription = dispatcher.subscribe(request).await?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match event {
                SubscriptionEvent::Ready => {
                    yield Ok(Event::default().comment("ready"));
                }
                SubscriptionEvent::Poke(poke) => {
                    let data = json!({
                        "stream": poke.stream,
                        "position": poke.position,
                        "globalPosition": poke.global_position,
                    });
                    yield Ok(Event::default().event("poke").json_data(data).unwrap_or_else(|_| Event::default()));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
