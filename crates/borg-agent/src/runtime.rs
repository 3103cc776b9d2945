use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::permission::ToolPermission;
use crate::tools::ToolServer;

/// One query against the LLM runtime.
///
/// Built fresh per message: the tool server inside carries the calling
/// thread's identity, so nothing here outlives the query.
#[derive(Clone)]
pub struct QueryRequest {
    pub prompt: String,
    /// Model name for the routed tier (e.g. "opus").
    pub model: String,
    /// The thread's working directory.
    pub cwd: PathBuf,
    /// Supplemental system prompt (thread identity, cross-thread how-to).
    pub system_prompt: String,
    /// Resume handle. `None` starts a fresh session. A tier change for an
    /// existing session is expressed by resuming with a different `model`.
    pub resume_session_id: Option<String>,
    /// The query's tool server, keyed to the calling thread. In-process
    /// runtimes (mocks, tests) call `execute` on it directly; the CLI
    /// runtime reads `bridge_args` from it to respawn the same server in
    /// its `tool-bridge` subprocess.
    pub tools: Arc<ToolServer>,
    /// Per-call allow/deny gate over runtime capabilities.
    pub permission: Arc<dyn ToolPermission>,
}

/// Events the runtime emits while a query streams.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A session identifier was issued. May arrive more than once — the
    /// runtime can re-key a resumed session (e.g. after compaction); the
    /// last one wins.
    SessionStarted { session_id: String },

    /// One assistant text block.
    AssistantText { text: String },

    /// The model invoked a tool.
    ToolUse { name: String },

    /// The runtime is compacting conversation context.
    Compacting,

    /// Terminal event: the stream's final result.
    Result { text: Option<String>, is_error: bool },
}

/// Interface to the LLM runtime. One implementation drives the real
/// agent CLI; tests plug in mocks.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Runtime name for logging.
    fn name(&self) -> &str;

    /// Execute one query, streaming events through `tx`. The channel
    /// closes when the stream ends; an `Err` marks the whole query as
    /// runtime-transient.
    async fn run(
        &self,
        req: &QueryRequest,
        tx: mpsc::Sender<RuntimeEvent>,
    ) -> Result<(), RuntimeError>;
}

/// Failures from the runtime seam. All variants are runtime-transient to
/// the scheduler — the retry budget decides their fate.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn runtime: {0}")]
    Spawn(String),

    #[error("runtime stream error: {0}")]
    Stream(String),

    #[error("runtime exited with code {code}: {message}")]
    Exit { code: i32, message: String },

    #[error("unparseable runtime output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
