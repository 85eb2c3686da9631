//! The `import` subcommand: reads NDJSON records from stdin and POSTs them
//! to `/import`, printing each progress event as it arrives and exiting
//! non-zero if the server reports an error (spec §6).

use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::cli::ImportArgs;

pub async fn run(args: ImportArgs) -> Result<()> {
    let mut body = Vec::new();
    tokio::io::stdin().read_to_end(&mut body).await?;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("{}/import", args.server))
        .bearer_auth(&args.token)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("import request failed ({status}): {text}");
    }

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();

    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            handle_event(line)?;
        }
    }

    if !buf.is_empty() {
        handle_event(&buf)?;
    }

    Ok(())
}

fn handle_event(line: &[u8]) -> Result<()> {
    let event: Value = serde_json::from_slice(line)?;

    if event.get("error").is_some() {
        bail!(
            "import aborted at line {}: {}",
            event.get("line").cloned().unwrap_or(Value::Null),
            event.get("message").and_then(Value::as_str).unwrap_or("unknown error")
        );
    }

    if event.get("done").and_then(Value::as_bool).unwrap_or(false) {
        println!(
            "imported {} messages in {:.3}s",
            event.get("imported").and_then(Value::as_u64).unwrap_or(0),
            event.get("elapsed").and_then(Value::as_f64).unwrap_or(0.0)
        );
    } else {
        println!(
            "progress: {} imported, up to global position {}",
            event.get("imported").and_then(Value::as_u64).unwrap_or(0),
            event.get("gpos").and_then(Value::as_i64).unwrap_or(0)
        );
    }

    Ok(())
}
