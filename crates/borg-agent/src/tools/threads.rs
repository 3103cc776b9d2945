use std::sync::Arc;

use async_trait::async_trait;

use super::{Tool, ToolCtx, ToolResult};

/// Registry listing for the model: who exists, where they work, and which
/// entry is the caller itself.
pub struct ListThreadsTool {
    ctx: Arc<ToolCtx>,
}

impl ListThreadsTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ListThreadsTool {
    fn name(&self) -> &str {
        "list_threads"
    }

    fn description(&self) -> &str {
        "List all registered threads with id, name and working directory. \
         Your own thread is marked."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let registry = self.ctx.threads.load();
        let listing: Vec<serde_json::Value> = registry
            .iter()
            .map(|(id, thread)| {
                let mut entry = serde_json::json!({
                    "threadId": id,
                    "name": &thread.name,
                    "cwd": &thread.cwd,
                });
                if thread.is_master {
                    entry["isMaster"] = serde_json::Value::Bool(true);
                }
                if *id == self.ctx.source_thread_id {
                    entry["caller"] = serde_json::Value::Bool(true);
                }
                entry
            })
            .collect();
        match serde_json::to_string_pretty(&listing) {
            Ok(json) => ToolResult::success(json),
            Err(e) => ToolResult::error(format!("failed to render thread list: {e}")),
        }
    }
}
