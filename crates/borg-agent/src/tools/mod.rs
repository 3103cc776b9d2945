//! Per-query tool server.
//!
//! A fresh [`ToolServer`] is built for every dispatched message with the
//! calling thread's identity baked in — that is how `send_message` knows
//! its `sourceThreadId` and how master-only tools stay master-only. All
//! tools return the uniform `{content, is_error}` envelope; a tool error
//! goes back to the model as an error content block, never up to the
//! scheduler.

pub mod containers;
pub mod knowledge;
pub mod send_message;
pub mod threads;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use borg_core::{BorgPaths, ThreadId};
use borg_queue::Queue;
use borg_state::ThreadStore;

/// What every tool call hands back to the model: one text block and an
/// error flag. A failed tool is still a normal answer from the model's
/// point of view — it never propagates past this envelope.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            content: message.to_string(),
            is_error: true,
        }
    }
}

/// Tool definition in the shape the runtime advertises to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Everything a tool can reach, scoped to the calling thread.
pub struct ToolCtx {
    /// The thread whose query is running.
    pub source_thread_id: ThreadId,
    /// Transport tag of the triggering envelope — cross-thread messages
    /// ride the same channel.
    pub channel: String,
    pub queue: Queue,
    pub threads: Arc<ThreadStore>,
    pub paths: BorgPaths,
    /// Container API front. `None` leaves container tools degraded to
    /// error blocks.
    pub docker_proxy_url: Option<String>,
    pub http: reqwest::Client,
}

/// The per-query tool collection.
pub struct ToolServer {
    ctx: Arc<ToolCtx>,
    tools: Vec<Box<dyn Tool>>,
}

impl ToolServer {
    /// Build the tool set for one query. Container lifecycle and host
    /// memory tools are registered only when the caller is the master
    /// thread.
    pub fn build(ctx: ToolCtx) -> Self {
        let ctx = Arc::new(ctx);
        let mut tools: Vec<Box<dyn Tool>> = vec![
            Box::new(send_message::SendMessageTool::new(Arc::clone(&ctx))),
            Box::new(threads::ListThreadsTool::new(Arc::clone(&ctx))),
            Box::new(knowledge::QueryKnowledgeBaseTool::new(Arc::clone(&ctx))),
            Box::new(containers::ContainerStatsTool::new(Arc::clone(&ctx))),
            Box::new(containers::SystemStatusTool::new(Arc::clone(&ctx))),
        ];
        if ctx.source_thread_id.is_master() {
            tools.push(Box::new(containers::HostMemoryTool::new(Arc::clone(&ctx))));
            tools.push(Box::new(containers::UpdateContainerMemoryTool::new(
                Arc::clone(&ctx),
            )));
            tools.push(Box::new(containers::ContainerLifecycleTool::new(
                Arc::clone(&ctx),
            )));
        }
        Self { ctx, tools }
    }

    /// Argv for `borg-daemon tool-bridge` that re-creates this exact
    /// server (same root, caller and channel) in the bridge process the
    /// LLM runtime spawns. In-process runtimes skip the bridge and call
    /// [`ToolServer::execute`] directly.
    pub fn bridge_args(&self) -> Vec<String> {
        vec![
            "tool-bridge".to_string(),
            "--root".to_string(),
            self.ctx.paths.root().display().to_string(),
            "--thread-id".to_string(),
            self.ctx.source_thread_id.to_string(),
            "--channel".to_string(),
            self.ctx.channel.clone(),
        ]
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute by name. Unknown names come back as error blocks — the
    /// model sees its own typo, the scheduler never does.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> ToolResult {
        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => tool.execute(input).await,
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}
