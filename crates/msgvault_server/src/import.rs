//! The `/import` endpoint (spec §6, backing C7): a chunked NDJSON body of
//! already-positioned records, and a response that is itself a stream of
//! progress events so a large import doesn't look hung to the client.
//!
//! Grounded on `msgvault_import::import_stream`'s batching contract: this
//! module's only job is turning an HTTP body into the `Stream<Item =
//! Result<ImportRecord>>` that function expects, and turning its progress
//! callback back into wire events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use msgvault_import::{import_stream, ImportProgress};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::auth::require_namespace;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_import(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let namespace = require_namespace(&state, &headers).await?;
    let store = state.store.clone();

    let (tx, rx) = mpsc::channel::<Value>(16);
    let line_no = Arc::new(AtomicU64::new(0));
    let records = Box::pin(ndjson_records(body, line_no.clone()));

    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let result = import_stream(store.as_ref(), &namespace, records, move |progress: ImportProgress| {
            let _ = progress_tx.try_send(json!({
                "imported": progress.imported,
                "gpos": progress.global_position,
            }));
        })
        .await;

        match result {
            Ok(summary) => {
                let _ = tx
                    .send(json!({
                        "done": true,
                        "imported": summary.imported,
                        "elapsed": summary.elapsed.as_secs_f64(),
                    }))
                    .await;
            }
            Err(err) => {
                let _ = tx
                    .send(json!({
                        "error": err.kind(),
                        "message": err.to_string(),
                        "line": line_no.load(Ordering::SeqCst),
                    }))
                    .await;
            }
        }
    });

    let body_stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, std::io::Error>(Bytes::from(format!("{event}\n")))
    });

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .expect("response with a streaming body is always valid"))
}

/// Splits the request body into NDJSON records, counting lines as they're
/// read so a mid-stream failure can be reported against the line that
/// caused it (spec §6 "a single `{error, message, line}` event").
fn ndjson_records(
    body: Body,
    line_no: Arc<AtomicU64>,
) -> impl Stream<Item = msgvault::Result<msgvault::ImportRecord>> {
    async_stream::stream! {
        let mut lines = Box::pin(ndjson_lines(body));
        while let Some(line) = lines.next().await {
            line_no.fetch_add(1, Ordering::SeqCst);
            match line {
                Ok(text) => yield parse_import_record(&text),
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
    }
}

/// Buffers request-body chunks and yields each newline-delimited, non-blank
/// line as it completes. Blank lines (including a trailing one after the
/// final `\n`) are skipped rather than yielded as empty records.
fn ndjson_lines(body: Body) -> impl Stream<Item = msgvault::Result<String>> {
    async_stream::stream! {
        let mut data = body.into_data_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(msgvault::Error::InvalidRequest(err.to_string()));
                    return;
                }
            };
            buf.extend_from_slice(&chunk);

            loop {
                let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                    break;
                };
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                match std::str::from_utf8(line) {
                    Ok(text) => {
                        let trimmed = text.trim_end_matches('\r');
                        if !trimmed.trim().is_empty() {
                            yield Ok(trimmed.to_string());
                        }
                    }
                    Err(err) => {
                        yield Err(msgvault::Error::InvalidJson(err.to_string()));
                        return;
                    }
                }
            }
        }

        if !buf.is_empty() {
            match std::str::from_utf8(&buf) {
                Ok(text) if !text.trim().is_empty() => yield Ok(text.trim_end_matches('\r').to_string()),
                Ok(_) => {}
                Err(err) => yield Err(msgvault::Error::InvalidJson(err.to_string())),
            }
        }
    }
}

fn parse_import_record(line: &str) -> msgvault::Result<msgvault::ImportRecord> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| msgvault::Error::InvalidJson("import record is not a JSON object".into()))?;

    let field_str = |key: &str| -> msgvault::Result<&str> {
        obj.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| msgvault::Error::InvalidJson(format!("import record missing \"{key}\"")))
    };
    let field_i64 = |key: &str| -> msgvault::Result<i64> {
        obj.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| msgvault::Error::InvalidJson(format!("import record missing \"{key}\"")))
    };

    let id = Uuid::parse_str(field_str("id")?).map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?;
    let stream_name = field_str("stream")?.to_string();
    let msg_type = field_str("type")?.to_string();
    let position = field_i64("pos")?;
    let global_position = field_i64("gpos")?;
    let data = obj.get("data").cloned().unwrap_or(Value::Null);
    let metadata = obj.get("meta").cloned().filter(|v| !v.is_null());
    let time: DateTime<Utc> = DateTime::parse_from_rfc3339(field_str("time")?)
        .map_err(|e| msgvault::Error::InvalidJson(e.to_string()))?
        .with_timezone(&Utc);

    Ok(msgvault::ImportRecord {
        id,
        stream_name,
        msg_type,
        position,
        global_position,
        data,
        metadata,
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_record() {
        let line = r#"{"id":"11111111-1111-1111-1111-111111111111","stream":"acct-1","type":"Deposited","pos":0,"gpos":1,"data":{},"time":"2025-01-01T00:00:00Z"}"#;
        let record = parse_import_record(line).unwrap();
        assert_eq!(record.stream_name, "acct-1");
        assert_eq!(record.position, 0);
        assert_eq!(record.global_position, 1);
        assert!(record.metadata.is_none());
    }

    #[test]
    fn rejects_a_missing_field() {
        let line = r#"{"id":"11111111-1111-1111-1111-111111111111","stream":"acct-1","type":"Deposited","pos":0}"#;
        assert!(parse_import_record(line).is_err());
    }
}
