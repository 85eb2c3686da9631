//! The `/rpc` endpoint: requests of the form `[method, arg1, …]`, dispatched
//! to the store/registry/name-utility operations they name (spec §6 "RPC
//! surface"). Namespace-scoped methods resolve their namespace from the
//! caller's bearer token rather than taking it as an explicit argument;
//! `ns.create`/`ns.delete`/`ns.list` require the separate admin token;
//! `util.*` and `sys.*` require no authentication at all.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use msgvault::{
    CategoryOpts, ConsumerGroup, ListStreamsOpts, Message, NewMessage, StreamOpts, Store, WriteOpts,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{generate_token, hash_token, require_admin, require_namespace};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let array = request
        .as_array()
        .ok_or_else(|| msgvault::Error::InvalidRequest("request must be a JSON array".into()))?;
    let method = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| msgvault::Error::InvalidRequest("missing RPC method name".into()))?;
    let args = if array.len() > 1 { &array[1..] } else { &[] };

    let result = dispatch(&state, &headers, method, args).await?;
    Ok(Json(result))
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    args: &[Value],
) -> Result<Value, ApiError> {
    match method {
        "stream.write" => stream_write(state, headers, args).await,
        "stream.get" => stream_get(state, headers, args).await,
        "stream.last" => stream_last(state, headers, args).await,
        "stream.version" => stream_version(state, headers, args).await,
        "category.get" => category_get(state, headers, args).await,
        "ns.create" => ns_create(state, headers, args).await,
        "ns.delete" => ns_delete(state, headers, args).await,
        "ns.list" => ns_list(state, headers).await,
        "ns.info" => ns_info(state, headers).await,
        "ns.streams" => ns_streams(state, headers, args).await,
        "ns.categories" => ns_categories(state, headers).await,
        "util.category" => Ok(json!(msgvault::stream_name::category(arg_str(args, 0, "stream")?))),
        "util.id" => Ok(json!(msgvault::stream_name::id(arg_str(args, 0, "stream")?))),
        "util.cardinalId" => Ok(json!(msgvault::stream_name::cardinal_id(arg_str(args, 0, "stream")?))),
        "util.isCategory" => Ok(json!(msgvault::stream_name::is_category(arg_str(args, 0, "stream")?))),
        "util.hash64" => Ok(json!(msgvault::hash64(arg_str(args, 0, "value")?))),
        "sys.version" => Ok(json!(env!("CARGO_PKG_VERSION"))),
        "sys.health" => Ok(json!({"status": "ok"})),
        other => Err(msgvault::Error::InvalidRequest(format!("unknown method: {other}")).into()),
    }
}

fn arg(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index)
}

fn arg_str<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, ApiError> {
    arg(args, index)
        .and_then(Value::as_str)
        .ok_or_else(|| msgvault::Error::InvalidRequest(format!("argument {index} ({name}) must be a string")).into())
}

fn new_message_from_value(value: &Value) -> Result<NewMessage, ApiError> {
    let obj = value
        .as_object()
        .ok_or_else(|| msgvault::Error::InvalidRequest("message must be a JSON object".into()))?;
    let msg_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| msgvault::Error::InvalidRequest("message.type is required".into()))?
        .to_string();
    let data = obj.get("data").cloned().unwrap_or(Value::Null);
    let metadata = obj.get("metadata").cloned().filter(|v| !v.is_null());
    let id = match obj.get("id") {
        Some(Value::String(s)) => Some(
            Uuid::parse_str(s)
                .map_err(|e| msgvault::Error::InvalidRequest(format!("message.id: {e}")))?,
        ),
        _ => None,
    };
    Ok(NewMessage {
        id,
        msg_type,
        data,
        metadata,
    })
}

fn write_opts_from_value(value: Option<&Value>) -> Result<WriteOpts, ApiError> {
    let mut opts = WriteOpts::default();
    let Some(obj) = value.and_then(Value::as_object) else {
        return Ok(opts);
    };
    if let Some(id) = obj.get("id").and_then(Value::as_str) {
        opts.id = Some(
            Uuid::parse_str(id).map_err(|e| msgvault::Error::InvalidRequest(format!("opts.id: {e}")))?,
        );
    }
    if let Some(v) = obj.get("expected_version").and_then(Value::as_i64) {
        opts.expected_version = Some(v);
    }
    Ok(opts)
}

fn stream_opts_from_value(value: Option<&Value>) -> StreamOpts {
    let mut opts = StreamOpts::default();
    let Some(obj) = value.and_then(Value::as_object) else {
        return opts;
    };
    if let Some(v) = obj.get("position").and_then(Value::as_i64) {
        opts.position = v;
    }
    if let Some(v) = obj.get("global_position").and_then(Value::as_i64) {
        opts.global_position = Some(v);
    }
    if let Some(v) = obj.get("batch_size").and_then(Value::as_i64) {
        opts.batch_size = v;
    }
    opts
}

fn category_opts_from_value(value: Option<&Value>) -> Result<CategoryOpts, ApiError> {
    let mut opts = CategoryOpts::default();
    let Some(obj) = value.and_then(Value::as_object) else {
        return Ok(opts);
    };
    if let Some(v) = obj.get("position").and_then(Value::as_i64) {
        opts.position = v;
    }
    if let Some(v) = obj.get("global_position").and_then(Value::as_i64) {
        opts.global_position = Some(v);
    }
    if let Some(v) = obj.get("batch_size").and_then(Value::as_i64) {
        opts.batch_size = v;
    }
    if let Some(v) = obj.get("correlation").and_then(Value::as_str) {
        opts.correlation = Some(v.to_string());
    }
    if let Some(cg) = obj.get("consumer_group").and_then(Value::as_object) {
        if let (Some(member), Some(size)) = (
            cg.get("member").and_then(Value::as_i64),
            cg.get("size").and_then(Value::as_i64),
        ) {
            opts.consumer_group = Some(validate_consumer_group(member, size)?);
        }
    }
    Ok(opts)
}

/// `assigned_to_member` (spec §4.1) requires `size > 0` and `0 <= member <
/// size`; a client-supplied consumer group must be checked here, at the wire
/// boundary, before it ever reaches the dispatcher or a backend — an invalid
/// group reaching `assigned_to_member` would panic inside the subscription
/// dispatcher's actor task, killing every live subscription on that
/// namespace, not just the one bad request.
pub(crate) fn validate_consumer_group(member: i64, size: i64) -> Result<ConsumerGroup, ApiError> {
    if size <= 0 {
        return Err(msgvault::Error::InvalidRequest(format!(
            "consumer_group.size must be greater than zero, got {size}"
        ))
        .into());
    }
    if member < 0 || member >= size {
        return Err(msgvault::Error::InvalidRequest(format!(
            "consumer_group.member must be in 0..{size}, got {member}"
        ))
        .into());
    }
    Ok(ConsumerGroup { member, size })
}

fn list_streams_opts_from_value(value: Option<&Value>) -> ListStreamsOpts {
    let mut opts = ListStreamsOpts::default();
    let Some(obj) = value.and_then(Value::as_object) else {
        return opts;
    };
    if let Some(v) = obj.get("prefix").and_then(Value::as_str) {
        opts.prefix = Some(v.to_string());
    }
    if let Some(v) = obj.get("limit").and_then(Value::as_i64) {
        opts.limit = v;
    }
    if let Some(v) = obj.get("cursor").and_then(Value::as_str) {
        opts.cursor = Some(v.to_string());
    }
    opts
}

async fn stream_write(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let stream_name = arg_str(args, 0, "stream")?.to_string();
    let message = new_message_from_value(arg(args, 1).ok_or_else(|| {
        msgvault::Error::InvalidRequest("stream.write requires a message argument".into())
    })?)?;
    let opts = write_opts_from_value(arg(args, 2))?;

    let (position, global_position) = state.store.write(&namespace, &stream_name, message, opts).await?;

    let dispatcher = state.dispatcher(&namespace);
    let _ = dispatcher
        .notify(msgvault_subscribe::Poke {
            stream: stream_name,
            position,
            global_position,
        })
        .await;

    Ok(json!({"position": position, "global_position": global_position}))
}

async fn stream_get(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let stream_name = arg_str(args, 0, "stream")?;
    let opts = stream_opts_from_value(arg(args, 1));
    let messages = state.store.get_stream(&namespace, stream_name, opts).await?;
    Ok(tuples(&messages, Message::to_stream_read_tuple))
}

async fn stream_last(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let stream_name = arg_str(args, 0, "stream")?;
    let msg_type = arg(args, 1).and_then(Value::as_str);
    let message = state.store.last(&namespace, stream_name, msg_type).await?;
    Ok(message.map(|m| m.to_stream_read_tuple()).unwrap_or(Value::Null))
}

async fn stream_version(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let stream_name = arg_str(args, 0, "stream")?;
    let version = state.store.version(&namespace, stream_name).await?;
    Ok(version.map(Value::from).unwrap_or(Value::Null))
}

async fn category_get(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let category = arg_str(args, 0, "category")?;
    let opts = category_opts_from_value(arg(args, 1))?;
    let messages = state.store.get_category(&namespace, category, opts).await?;
    Ok(tuples(&messages, Message::to_category_read_tuple))
}

fn tuples(messages: &[Message], to_tuple: impl Fn(&Message) -> Value) -> Value {
    Value::Array(messages.iter().map(to_tuple).collect())
}

async fn ns_create(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    require_admin(state, headers).await?;
    let id = arg_str(args, 0, "id")?.to_string();
    let description = arg(args, 1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = arg(args, 2).cloned().unwrap_or(json!({}));

    let token = generate_token();
    let token_hash = hash_token(&token);

    let location = state.store.namespace_create(&id).await?;
    let row = state
        .registry
        .create(id, token_hash, location, description, metadata)
        .await?;

    Ok(json!({
        "id": row.id,
        "token": token,
        "location": row.location,
        "description": row.description,
        "created_at": row.created_at,
        "metadata": row.metadata,
    }))
}

async fn ns_delete(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    require_admin(state, headers).await?;
    let id = arg_str(args, 0, "id")?.to_string();
    let row = state.registry.delete(id.clone()).await?;
    state.store.namespace_delete(&id).await?;
    Ok(json!({"id": row.id}))
}

async fn ns_list(state: &AppState, headers: &HeaderMap) -> Result<Value, ApiError> {
    require_admin(state, headers).await?;
    let rows = state.registry.list().await?;
    Ok(Value::Array(
        rows.into_iter()
            .map(|row| {
                json!({
                    "id": row.id,
                    "location": row.location,
                    "description": row.description,
                    "created_at": row.created_at,
                    "metadata": row.metadata,
                })
            })
            .collect(),
    ))
}

async fn ns_info(state: &AppState, headers: &HeaderMap) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let row = state
        .registry
        .get(namespace.clone())
        .await?
        .ok_or_else(|| msgvault::Error::NamespaceNotFound(namespace.clone()))?;
    let info = state.store.namespace_info(&namespace).await?;

    Ok(json!({
        "id": row.id,
        "location": row.location,
        "description": row.description,
        "created_at": row.created_at,
        "metadata": row.metadata,
        "message_count": info.message_count,
        "stream_count": info.stream_count,
        "last_activity": info.last_activity,
    }))
}

async fn ns_streams(state: &AppState, headers: &HeaderMap, args: &[Value]) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let opts = list_streams_opts_from_value(arg(args, 0));
    let items = state.store.list_streams(&namespace, opts).await?;
    Ok(Value::Array(
        items
            .into_iter()
            .map(|item| json!({"stream": item.stream, "version": item.version, "last_activity": item.last_activity}))
            .collect(),
    ))
}

async fn ns_categories(state: &AppState, headers: &HeaderMap) -> Result<Value, ApiError> {
    let namespace = require_namespace(state, headers).await?;
    let items = state.store.list_categories(&namespace).await?;
    Ok(Value::Array(
        items
            .into_iter()
            .map(|item| {
                json!({
                    "category": item.category,
                    "stream_count": item.stream_count,
                    "message_count": item.message_count,
                })
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_array_requests() {
        let args: Vec<Value> = vec![];
        assert!(arg_str(&args, 0, "stream").is_err());
    }

    #[test]
    fn stream_opts_defaults_when_absent() {
        let opts = stream_opts_from_value(None);
        assert_eq!(opts.position, 0);
        assert_eq!(opts.batch_size, 1000);
    }

    #[test]
    fn category_opts_parses_consumer_group() {
        let value = json!({"consumer_group": {"member": 1, "size": 4}});
        let opts = category_opts_from_value(Some(&value)).unwrap();
        assert_eq!(opts.consumer_group, Some(ConsumerGroup { member: 1, size: 4 }));
    }

    #[test]
    fn category_opts_rejects_zero_size_consumer_group() {
        let value = json!({"consumer_group": {"member": 0, "size": 0}});
        assert!(category_opts_from_value(Some(&value)).is_err());
    }

    #[test]
    fn category_opts_rejects_member_out_of_range() {
        let value = json!({"consumer_group": {"member": 4, "size": 4}});
        assert!(category_opts_from_value(Some(&value)).is_err());

        let value = json!({"consumer_group": {"member": -1, "size": 4}});
        assert!(category_opts_from_value(Some(&value)).is_err());
    }
}
