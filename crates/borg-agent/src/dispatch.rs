use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use borg_core::config::{
    HEARTBEAT_OK, MAX_RESPONSE_CHARS, NO_RESPONSE_PLACEHOLDER, RESPONSE_TRUNCATE_AT,
    TRUNCATION_NOTICE,
};
use borg_core::types::clip_chars;
use borg_core::{Thread, ThreadId, Tier};
use borg_queue::StatusDir;
use borg_state::ThreadStore;

use crate::permission::ToolGate;
use crate::runtime::{AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent};
use crate::tools::ToolServer;

/// What a successful dispatch hands back to the scheduler.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub text: String,
    /// The latest session identifier observed on the stream. The runtime
    /// may re-key a resumed session, so this is what gets persisted.
    pub session_id: Option<String>,
}

/// Runs one LLM query per message and owns the session bookkeeping
/// around it: resume-or-create, capture of re-keyed session ids, status
/// beacon updates, and clearing a possibly-invalidated session on
/// failure.
pub struct Dispatcher {
    runtime: Arc<dyn AgentRuntime>,
    threads: Arc<ThreadStore>,
    status: StatusDir,
}

impl Dispatcher {
    pub fn new(runtime: Arc<dyn AgentRuntime>, threads: Arc<ThreadStore>, status: StatusDir) -> Self {
        Self {
            runtime,
            threads,
            status,
        }
    }

    /// Dispatch a routed message on the thread's persistent session.
    ///
    /// A tier change for an existing session is expressed by resuming the
    /// stored session id under the new tier's model — there is no
    /// separate switch call.
    pub async fn dispatch(
        &self,
        thread_id: ThreadId,
        thread: &Thread,
        tier: Tier,
        prompt: String,
        system_prompt: String,
        tools: Arc<ToolServer>,
        message_id: &str,
    ) -> Result<DispatchOutcome, RuntimeError> {
        self.status.set(message_id, "Thinking… (0s)");
        let req = QueryRequest {
            prompt,
            model: tier.model().to_string(),
            cwd: thread.cwd.clone(),
            system_prompt,
            resume_session_id: thread.session_id.clone(),
            tools,
            permission: Arc::new(ToolGate),
        };

        match self.run_query(&req, message_id).await {
            Ok(outcome) => {
                if let Some(ref session_id) = outcome.session_id {
                    self.threads
                        .set_session(thread_id, Some(session_id.clone()))
                        .map_err(|e| {
                            RuntimeError::Stream(format!("session persist failed: {e}"))
                        })?;
                }
                info!(
                    thread_id = %thread_id,
                    model = %req.model,
                    chars = outcome.text.chars().count(),
                    "dispatch complete"
                );
                self.status.clear(message_id);
                Ok(outcome)
            }
            Err(e) => {
                // the stored session may have been invalidated mid-stream;
                // drop it so the retry starts clean
                if let Err(persist) = self.threads.set_session(thread_id, None) {
                    warn!(thread_id = %thread_id, err = %persist, "session clear failed");
                }
                self.status.clear(message_id);
                Err(e)
            }
        }
    }

    /// Heartbeat fast path: a one-shot query at the lowest tier. No
    /// session is created, resumed or updated; empty output reads as
    /// "nothing to report".
    pub async fn heartbeat(
        &self,
        thread: &Thread,
        prompt: String,
        system_prompt: String,
        tools: Arc<ToolServer>,
        message_id: &str,
    ) -> Result<String, RuntimeError> {
        self.status.set(message_id, "Thinking… (0s)");
        let req = QueryRequest {
            prompt,
            model: Tier::Simple.model().to_string(),
            cwd: thread.cwd.clone(),
            system_prompt,
            resume_session_id: None,
            tools,
            permission: Arc::new(ToolGate),
        };
        let result = self.run_query(&req, message_id).await;
        self.status.clear(message_id);

        let outcome = result?;
        if outcome.text == NO_RESPONSE_PLACEHOLDER {
            Ok(HEARTBEAT_OK.to_string())
        } else {
            Ok(outcome.text)
        }
    }

    /// Drive one runtime query, observing the event stream into the
    /// status beacon and folding it into a final text.
    async fn run_query(
        &self,
        req: &QueryRequest,
        message_id: &str,
    ) -> Result<DispatchOutcome, RuntimeError> {
        let (tx, mut rx) = mpsc::channel(64);
        let runtime = Arc::clone(&self.runtime);
        let run_req = req.clone();
        let handle = tokio::spawn(async move { runtime.run(&run_req, tx).await });

        let started = Instant::now();
        let mut texts: Vec<String> = Vec::new();
        let mut session_id = req.resume_session_id.clone();
        let mut final_text: Option<String> = None;
        let mut stream_error: Option<String> = None;

        while let Some(event) = rx.recv().await {
            let secs = started.elapsed().as_secs();
            match event {
                RuntimeEvent::SessionStarted { session_id: sid } => {
                    debug!(session_id = %sid, "session id captured");
                    session_id = Some(sid);
                }
                RuntimeEvent::AssistantText { text } => {
                    texts.push(text);
                    self.status.set(message_id, format!("Thinking… ({secs}s)"));
                }
                RuntimeEvent::ToolUse { name } => {
                    self.status
                        .set(message_id, format!("Using {name}… ({secs}s)"));
                }
                RuntimeEvent::Compacting => {
                    self.status
                        .set(message_id, format!("Compacting context… ({secs}s)"));
                }
                RuntimeEvent::Result { text, is_error } => {
                    if is_error {
                        stream_error =
                            Some(text.unwrap_or_else(|| "runtime reported an error".into()));
                    } else {
                        final_text = text;
                    }
                }
            }
        }

        handle
            .await
            .map_err(|e| RuntimeError::Stream(format!("runtime task died: {e}")))??;

        if let Some(message) = stream_error {
            return Err(RuntimeError::Stream(message));
        }

        let text = if texts.is_empty() {
            final_text.unwrap_or_default()
        } else {
            texts.join("\n")
        };
        Ok(DispatchOutcome {
            text: finalize_response(&text),
            session_id,
        })
    }
}

/// Empty ⇒ placeholder; oversize ⇒ clip and append the truncation notice.
pub fn finalize_response(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return NO_RESPONSE_PLACEHOLDER.to_string();
    }
    if trimmed.chars().count() > MAX_RESPONSE_CHARS {
        let mut out = clip_chars(trimmed, RESPONSE_TRUNCATE_AT).to_string();
        out.push_str(TRUNCATION_NOTICE);
        out
    } else {
        trimmed.to_string()
    }
}
