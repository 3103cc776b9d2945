use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::permission::{Permission, DENIED_CAPABILITIES};
use crate::runtime::{AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent};

/// LLM runtime backed by the Claude Code CLI (`claude -p`).
///
/// One process per query: the prompt goes to stdin, events come back as
/// `--output-format stream-json` lines. Session resume and model
/// selection ride the CLI flags; the cross-thread tool server is exposed
/// to the CLI through an MCP bridge process — `borg-daemon tool-bridge`,
/// launched with the argv the query's [`ToolServer`](crate::ToolServer)
/// describes for itself.
pub struct ClaudeCliRuntime {
    command: String,
    /// Binary serving the `tool-bridge` subcommand. The daemon passes its
    /// own executable here; `None` leaves the CLI with built-in tools
    /// only.
    mcp_bridge: Option<std::path::PathBuf>,
}

impl ClaudeCliRuntime {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mcp_bridge: None,
        }
    }

    pub fn with_mcp_bridge(mut self, bridge: Option<std::path::PathBuf>) -> Self {
        self.mcp_bridge = bridge;
        self
    }

    /// Write the MCP config to a temp file for `--mcp-config`. The bridge
    /// argv comes from the query's tool server so the subprocess rebuilds
    /// the same tools for the same caller. The handle must stay alive
    /// until the child exits.
    fn write_mcp_config(
        &self,
        req: &QueryRequest,
        cmd: &mut tokio::process::Command,
    ) -> Option<tempfile::NamedTempFile> {
        let bridge = self.mcp_bridge.as_ref()?;
        let config = serde_json::json!({
            "mcpServers": {
                "borg": {
                    "type": "stdio",
                    "command": bridge,
                    "args": req.tools.bridge_args()
                }
            }
        });
        let file = tempfile::Builder::new()
            .prefix("borg-mcp-")
            .suffix(".json")
            .tempfile()
            .ok()?;
        std::fs::write(file.path(), serde_json::to_string(&config).ok()?).ok()?;
        cmd.arg("--mcp-config").arg(file.path());
        Some(file)
    }
}

impl Default for ClaudeCliRuntime {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn run(
        &self,
        req: &QueryRequest,
        tx: mpsc::Sender<RuntimeEvent>,
    ) -> Result<(), RuntimeError> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&req.model)
            .arg("--append-system-prompt")
            .arg(&req.system_prompt)
            .current_dir(&req.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if let Some(ref session_id) = req.resume_session_id {
            cmd.arg("--resume").arg(session_id);
        }
        for capability in DENIED_CAPABILITIES {
            if let Permission::Deny { .. } = req.permission.check(capability) {
                cmd.arg("--disallowedTools").arg(capability);
            }
        }
        let _mcp_file = self.write_mcp_config(req, &mut cmd);

        debug!(
            command = %self.command,
            model = %req.model,
            resume = req.resume_session_id.is_some(),
            cwd = %req.cwd.display(),
            "spawning claude CLI"
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::Spawn(format!(
                    "claude CLI not found at '{}' — install Claude Code first",
                    self.command
                ))
            } else {
                RuntimeError::Spawn(format!("failed to spawn claude CLI: {e}"))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(req.prompt.as_bytes()).await?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Spawn("claude CLI stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            for event in parse_stream_line(&line) {
                if tx.send(event).await.is_err() {
                    // consumer went away; let the child finish on its own
                    warn!("runtime event receiver dropped mid-stream");
                    break;
                }
            }
        }

        let mut stderr_buf = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut stderr_buf).await;
        }
        let status = child.wait().await?;
        if !status.success() {
            let code = status.code().unwrap_or(1);
            return Err(RuntimeError::Exit {
                code,
                message: stderr_buf.chars().take(500).collect(),
            });
        }
        Ok(())
    }
}

/// Parse one stream-json line into runtime events. Unknown line types are
/// skipped — the CLI adds new ones over time.
fn parse_stream_line(line: &str) -> Vec<RuntimeEvent> {
    let value: serde_json::Value = match serde_json::from_str(line.trim()) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let mut events = Vec::new();

    // any line may (re-)announce the session id
    if let Some(session_id) = value.get("session_id").and_then(|v| v.as_str()) {
        events.push(RuntimeEvent::SessionStarted {
            session_id: session_id.to_string(),
        });
    }

    match value.get("type").and_then(|v| v.as_str()) {
        Some("system") => {
            if value.get("subtype").and_then(|v| v.as_str()) == Some("compact_boundary") {
                events.push(RuntimeEvent::Compacting);
            }
        }
        Some("assistant") => {
            if let Some(blocks) = value.pointer("/message/content").and_then(|v| v.as_array()) {
                for block in blocks {
                    match block.get("type").and_then(|v| v.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                                events.push(RuntimeEvent::AssistantText {
                                    text: text.to_string(),
                                });
                            }
                        }
                        Some("tool_use") => {
                            if let Some(name) = block.get("name").and_then(|v| v.as_str()) {
                                events.push(RuntimeEvent::ToolUse {
                                    name: name.to_string(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Some("result") => {
            events.push(RuntimeEvent::Result {
                text: value
                    .get("result")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                is_error: value
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            });
        }
        _ => {}
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_line_yields_session_started() {
        let events = parse_stream_line(
            r#"{"type":"system","subtype":"init","session_id":"abc-123","model":"opus"}"#,
        );
        assert!(matches!(
            &events[0],
            RuntimeEvent::SessionStarted { session_id } if session_id == "abc-123"
        ));
    }

    #[test]
    fn assistant_line_yields_text_and_tool_use() {
        let events = parse_stream_line(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"working on it"},
                {"type":"tool_use","name":"Bash","input":{}}
            ]}}"#,
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::AssistantText { text } if text == "working on it")));
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::ToolUse { name } if name == "Bash")));
    }

    #[test]
    fn compact_boundary_yields_compacting() {
        let events =
            parse_stream_line(r#"{"type":"system","subtype":"compact_boundary","session_id":"new-id"}"#);
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::Compacting)));
        // the re-keyed session id arrives on the same line
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::SessionStarted { session_id } if session_id == "new-id")));
    }

    #[test]
    fn result_line_carries_text_and_error_flag() {
        let events = parse_stream_line(
            r#"{"type":"result","subtype":"success","result":"all done","is_error":false,"session_id":"abc"}"#,
        );
        assert!(events.iter().any(|e| matches!(
            e,
            RuntimeEvent::Result { text: Some(t), is_error: false } if t == "all done"
        )));
    }

    #[test]
    fn garbage_lines_are_skipped() {
        assert!(parse_stream_line("not json at all").is_empty());
        assert!(parse_stream_line(r#"{"type":"user_echo"}"#).is_empty());
    }
}
