use std::sync::Arc;

use async_trait::async_trait;

use borg_core::config::KNOWLEDGE_BASE_FILES;
use borg_core::MASTER_THREAD;

use super::{Tool, ToolCtx, ToolResult};

/// Read-only access to the shared knowledge base under the master
/// thread's working directory. The filename allowlist is the contract —
/// no path components, no other files.
pub struct QueryKnowledgeBaseTool {
    ctx: Arc<ToolCtx>,
}

impl QueryKnowledgeBaseTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for QueryKnowledgeBaseTool {
    fn name(&self) -> &str {
        "query_knowledge_base"
    }

    fn description(&self) -> &str {
        "Read a shared knowledge base file maintained by the master \
         thread: context.md, decisions.md or active-projects.md."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "enum": KNOWLEDGE_BASE_FILES,
                    "description": "Which knowledge base file to read."
                }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let filename = match input.get("filename").and_then(|v| v.as_str()) {
            Some(f) => f,
            None => return ToolResult::error("missing 'filename'"),
        };
        if !KNOWLEDGE_BASE_FILES.contains(&filename) {
            return ToolResult::error(format!(
                "'{filename}' is not a knowledge base file; valid: {}",
                KNOWLEDGE_BASE_FILES.join(", ")
            ));
        }

        let master = match self.ctx.threads.get(MASTER_THREAD) {
            Some(t) => t,
            None => return ToolResult::error("master thread is not configured"),
        };
        let path = master.cwd.join(filename);
        match std::fs::read_to_string(&path) {
            Ok(content) => ToolResult::success(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ToolResult::error(format!("{filename} does not exist yet"))
            }
            Err(e) => ToolResult::error(format!("failed to read {filename}: {e}")),
        }
    }
}
