//! The `export` subcommand: walks every stream in a namespace via `ns.streams`
//! and `stream.get`, then prints the combined result as NDJSON in
//! global-position order — the inverse of `import`, and the shape the
//! "import round-trip" scenario (spec §8) exercises.

use anyhow::Result;
use serde_json::{json, Value};

use crate::cli::ExportArgs;
use crate::client::RpcClient;

pub async fn run(args: ExportArgs) -> Result<()> {
    let client = RpcClient::new(args.server, args.token);

    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let opts = match &cursor {
            Some(cursor) => json!({"limit": 1000, "cursor": cursor}),
            None => json!({"limit": 1000}),
        };
        let page = client.call("ns.streams", vec![opts]).await?;
        let page = page.as_array().cloned().unwrap_or_default();
        if page.is_empty() {
            break;
        }

        for entry in &page {
            let stream = entry
                .get("stream")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("ns.streams returned an entry with no stream name"))?;
            let tuples = client
                .call("stream.get", vec![json!(stream), json!({"batch_size": -1})])
                .await?;
            for tuple in tuples.as_array().cloned().unwrap_or_default() {
                records.push(export_record(stream, &tuple)?);
            }
        }

        let last_stream = page.last().and_then(|e| e.get("stream")).and_then(Value::as_str);
        cursor = last_stream.map(str::to_string);
        if (page.len() as i64) < 1000 {
            break;
        }
    }

    records.sort_by_key(|r| r.get("gpos").and_then(Value::as_i64).unwrap_or(i64::MAX));

    for record in records {
        println!("{record}");
    }

    Ok(())
}

/// Converts one `stream.get` wire tuple `[id, type, position,
/// global_position, data, metadata, time]` into the `import` endpoint's
/// record shape `{id, stream, type, pos, gpos, data, meta?, time}`.
fn export_record(stream: &str, tuple: &Value) -> Result<Value> {
    let tuple = tuple
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("stream.get returned a non-array tuple"))?;
    let get = |index: usize| tuple.get(index).cloned().unwrap_or(Value::Null);

    Ok(json!({
        "id": get(0),
        "stream": stream,
        "type": get(1),
        "pos": get(2),
        "gpos": get(3),
        "data": get(4),
        "meta": get(5),
        "time": get(6),
    }))
}
