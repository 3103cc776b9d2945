//! `borg-daemon tool-bridge` — serves one thread's tool server to the
//! LLM runtime over MCP stdio.
//!
//! The runtime spawns one bridge per query with the argv the query's
//! `ToolServer` described (`--root`, `--thread-id`, `--channel`), so the
//! subprocess rebuilds the same tools for the same caller. Protocol:
//! JSON-RPC lines on stdin/stdout — `initialize`, `tools/list`,
//! `tools/call`; notifications get no reply. Logs go to stderr, stdout
//! belongs to the protocol.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use borg_agent::{ToolCtx, ToolServer};
use borg_core::{BorgPaths, ThreadId};
use borg_queue::Queue;
use borg_state::ThreadStore;

pub async fn serve(root: PathBuf, thread_id: u32, channel: String) -> anyhow::Result<()> {
    let paths = BorgPaths::new(root);
    paths.ensure_layout()?;
    let ctx = ToolCtx {
        source_thread_id: ThreadId(thread_id),
        channel,
        queue: Queue::new(paths.clone()),
        threads: Arc::new(ThreadStore::new(&paths)),
        paths,
        docker_proxy_url: std::env::var("DOCKER_PROXY_URL").ok().filter(|u| !u.is_empty()),
        http: reqwest::Client::new(),
    };
    let server = ToolServer::build(ctx);
    debug!(thread_id, "tool bridge serving");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(response) = handle_message(&server, line).await else {
            continue;
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// One protocol message in, at most one response out. Notifications and
/// unparseable lines produce nothing.
async fn handle_message(server: &ToolServer, raw: &str) -> Option<serde_json::Value> {
    let msg: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, "unparseable bridge message skipped");
            return None;
        }
    };
    // requests carry an id; notifications never get a reply
    let id = msg.get("id").filter(|v| !v.is_null()).cloned()?;
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or_default();

    match method {
        "initialize" => Some(rpc_ok(
            id,
            json!({
                "protocolVersion": msg
                    .pointer("/params/protocolVersion")
                    .cloned()
                    .unwrap_or_else(|| json!("2024-11-05")),
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "borg",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )),
        "ping" => Some(rpc_ok(id, json!({}))),
        "tools/list" => {
            let tools: Vec<serde_json::Value> = server
                .definitions()
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.name,
                        "description": d.description,
                        "inputSchema": d.input_schema,
                    })
                })
                .collect();
            Some(rpc_ok(id, json!({ "tools": tools })))
        }
        "tools/call" => {
            let name = msg
                .pointer("/params/name")
                .and_then(|n| n.as_str())
                .unwrap_or_default();
            let arguments = msg
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let result = server.execute(name, arguments).await;
            Some(rpc_ok(
                id,
                json!({
                    "content": [{ "type": "text", "text": result.content }],
                    "isError": result.is_error,
                }),
            ))
        }
        other => Some(rpc_err(id, -32601, format!("method not found: {other}"))),
    }
}

fn rpc_ok(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_err(id: serde_json::Value, code: i64, message: String) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}
