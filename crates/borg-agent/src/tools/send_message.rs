use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use borg_core::types::now_ts;
use borg_core::{IncomingEnvelope, OutgoingEnvelope, Source, ThreadId};

use super::{Tool, ToolCtx, ToolResult};

/// Cross-thread messaging: drops an envelope into the target thread's
/// queue, plus a visibility copy into `outgoing/` so the chat adapter can
/// surface what was sent. The receiving adapter must dedupe against its
/// own bot identity or the two writes loop.
pub struct SendMessageTool {
    ctx: Arc<ToolCtx>,
}

impl SendMessageTool {
    pub fn new(ctx: Arc<ToolCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to another thread. It will be delivered to that \
         thread's agent as a cross-thread message. Use list_threads to see \
         valid targets."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "targetThreadId": {
                    "type": "integer",
                    "description": "Thread to deliver to. Must be registered; not your own thread."
                },
                "message": {
                    "type": "string",
                    "description": "The text to deliver."
                }
            },
            "required": ["targetThreadId", "message"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let target = match input.get("targetThreadId").and_then(|v| v.as_u64()) {
            Some(t) if t > 0 && t <= u32::MAX as u64 => ThreadId(t as u32),
            _ => return ToolResult::error("missing or invalid 'targetThreadId'"),
        };
        let message = match input.get("message").and_then(|v| v.as_str()) {
            Some(m) if !m.is_empty() => m,
            _ => return ToolResult::error("missing or empty 'message'"),
        };

        let me = self.ctx.source_thread_id;
        if target == me {
            return ToolResult::error("refusing to send a message to your own thread");
        }
        let registry = self.ctx.threads.load();
        if !registry.contains_key(&target) {
            return ToolResult::error(format!(
                "thread {target} is not registered; valid targets: {}",
                registry
                    .keys()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        let sender = registry
            .get(&me)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| format!("Thread {me}"));

        let ts = now_ts();
        let message_id = format!("ct-{ts}-{}", uuid::Uuid::new_v4().simple());

        let incoming = IncomingEnvelope {
            channel: self.ctx.channel.clone(),
            source: Source::CrossThread,
            thread_id: target,
            source_thread_id: Some(me),
            sender: sender.clone(),
            message: message.to_string(),
            is_reply: false,
            reply_to_text: None,
            reply_to_model: None,
            topic_name: None,
            timestamp: ts,
            message_id: message_id.clone(),
        };
        if let Err(e) = self.ctx.queue.publish_incoming(&incoming) {
            return ToolResult::error(format!("failed to enqueue message: {e}"));
        }

        // Visibility copy for the adapter; delivery failure here is not
        // worth failing the send over.
        let outgoing = OutgoingEnvelope {
            channel: self.ctx.channel.clone(),
            thread_id: me,
            sender,
            message: message.to_string(),
            original_message: message.to_string(),
            timestamp: ts,
            message_id: message_id.clone(),
            model: registry
                .get(&me)
                .map(|t| t.model.model().to_string())
                .unwrap_or_else(|| "sonnet".to_string()),
            target_thread_id: Some(target),
        };
        if let Err(e) = self.ctx.queue.publish_outgoing(&outgoing, false) {
            tracing::warn!(err = %e, "cross-thread visibility envelope failed");
        }

        info!(from = %me, to = %target, message_id = %message_id, "cross-thread message queued");
        ToolResult::success(format!("Message queued for thread {target} ({message_id})"))
    }
}
