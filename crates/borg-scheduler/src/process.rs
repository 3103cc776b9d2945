//! The per-message pipeline: claim → validate → history → route →
//! prompt → dispatch → outgoing, with the retry/dead-letter failure path.

use std::sync::Arc;

use tracing::{error, info, warn};

use borg_agent::{PromptAssembler, RuntimeError, ToolCtx, ToolServer};
use borg_core::config::{HISTORY_CONTEXT_MASTER, HISTORY_CONTEXT_THREAD, ROUTER_ENRICH_ENTRIES};
use borg_core::types::now_ts;
use borg_core::{
    BorgError, Direction, HistoryEntry, IncomingEnvelope, OutgoingEnvelope, Source, Tier,
};
use borg_history::router_input;
use borg_queue::{QueueFile, RetryOutcome};
use borg_router::effective_tier;

use crate::engine::Engine;

impl Engine {
    /// Run one incoming file to completion. All failure handling is
    /// internal — the caller only releases the claim afterwards.
    pub(crate) async fn process_message(&self, file: &QueueFile) {
        let name = &file.name;

        match self.queue.claim(name) {
            Ok(Some(_)) => {}
            // another worker won the rename race; nothing to do
            Ok(None) => return,
            Err(e) => {
                error!(name = %name, err = %e, "claim failed");
                return;
            }
        }

        let envelope = match self.queue.read_claimed(name) {
            Ok(envelope) => envelope,
            Err(BorgError::Validation(msg)) => {
                warn!(name = %name, reason = %msg, "envelope rejected");
                if let Err(e) = self.queue.dead_letter(name) {
                    error!(name = %name, err = %e, "dead-letter move failed");
                }
                return;
            }
            Err(e) => {
                warn!(name = %name, err = %e, "claimed file unreadable, re-queueing");
                self.fail(name);
                return;
            }
        };
        let message_id = envelope.message_id.clone();

        let inbound = HistoryEntry {
            ts: now_ts(),
            thread_id: envelope.thread_id,
            channel: envelope.channel.clone(),
            sender: envelope.sender.clone(),
            direction: Direction::In,
            message: envelope.message.clone(),
            source: Some(envelope.source),
            source_thread_id: envelope.source_thread_id,
            session_id: None,
            model: None,
        };
        if let Err(e) = self.history.append(&inbound) {
            warn!(err = %e, "inbound history append failed");
        }

        let result = if envelope.source == Source::Heartbeat {
            self.run_heartbeat(&envelope).await
        } else {
            self.run_standard(&envelope).await
        };

        self.status.clear(&message_id);
        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(name) {
                    error!(name = %name, err = %e, "processing file cleanup failed");
                }
            }
            Err(e) => {
                warn!(name = %name, err = %e, "dispatch failed");
                self.fail(name);
            }
        }
    }

    fn fail(&self, name: &str) {
        match self.queue.retry_or_dead_letter(name) {
            Ok(RetryOutcome::Retried(next)) => info!(name = %name, next = %next, "will retry"),
            Ok(RetryOutcome::DeadLettered(dead)) => {
                warn!(name = %name, dead = %dead, "gave up on message")
            }
            Err(e) => error!(name = %name, err = %e, "failure path rename failed"),
        }
    }

    /// The standard path: route (with reply-clamp), load or create the
    /// thread, assemble the prompt, dispatch on the persistent session,
    /// record the results.
    async fn run_standard(&self, envelope: &IncomingEnvelope) -> Result<(), RuntimeError> {
        let thread_id = envelope.thread_id;
        let settings = self.settings.load();

        // Router enrichment: recent same-thread turns, minus the inbound
        // entry this very message just appended.
        let mut recent = self.history.tail(ROUTER_ENRICH_ENTRIES + 1, Some(thread_id));
        if recent
            .last()
            .is_some_and(|e| e.direction == Direction::In && e.message == envelope.message)
        {
            recent.pop();
        }
        if recent.len() > ROUTER_ENRICH_ENTRIES {
            recent.drain(..recent.len() - ROUTER_ENRICH_ENTRIES);
        }

        let router_text = router_input(&recent, envelope.reply_to_text.as_deref(), &envelope.message);
        let mut decision = self.router.classify(&router_text, None);
        let routed = decision.tier;
        let effective = effective_tier(routed, envelope.reply_to_model.as_deref());
        if effective != routed {
            decision
                .signals
                .push(format!("replyClamp:{routed}->{effective}"));
            decision.tier = effective;
            decision.model = effective.model().to_string();
        }
        self.routing_log.record(&router_text, &decision);
        info!(
            thread_id = %thread_id,
            message_id = %envelope.message_id,
            tier = %effective,
            confidence = %format!("{:.2}", decision.confidence),
            "routed"
        );

        let thread = self
            .threads
            .ensure_thread(thread_id, envelope.topic_name.as_deref())
            .map_err(store_err)?;
        self.threads.set_model(thread_id, effective).map_err(store_err)?;

        let new_session = thread.session_id.is_none();
        let mut history_context = if !new_session {
            Vec::new()
        } else if thread_id.is_master() {
            self.history.tail(HISTORY_CONTEXT_MASTER, None)
        } else {
            self.history.tail(HISTORY_CONTEXT_THREAD, Some(thread_id))
        };
        // the block is prior context; the message itself follows the prefix
        if history_context
            .last()
            .is_some_and(|e| e.direction == Direction::In && e.message == envelope.message)
        {
            history_context.pop();
        }

        let assembler = PromptAssembler::new(&settings.timezone);
        let prompt = assembler.build_prompt(envelope, new_session, &history_context);
        let system = assembler.system_supplement(thread_id, &thread, &self.paths);
        self.prompt_log.record(
            thread_id,
            &envelope.message_id,
            envelope.source,
            effective,
            new_session,
            &prompt,
        );

        let tools = Arc::new(ToolServer::build(self.tool_ctx(envelope)));
        let outcome = self
            .dispatcher
            .dispatch(
                thread_id,
                &thread,
                effective,
                prompt,
                system,
                tools,
                &envelope.message_id,
            )
            .await?;

        let outbound = HistoryEntry {
            ts: now_ts(),
            thread_id,
            channel: envelope.channel.clone(),
            sender: "borg".to_string(),
            direction: Direction::Out,
            message: outcome.text.clone(),
            source: None,
            source_thread_id: None,
            session_id: outcome.session_id.clone(),
            model: Some(effective.model().to_string()),
        };
        if let Err(e) = self.history.append(&outbound) {
            warn!(err = %e, "outbound history append failed");
        }

        let outgoing = OutgoingEnvelope {
            channel: envelope.channel.clone(),
            thread_id,
            sender: "borg".to_string(),
            message: outcome.text,
            original_message: envelope.message.clone(),
            timestamp: now_ts(),
            message_id: envelope.message_id.clone(),
            model: effective.model().to_string(),
            target_thread_id: None,
        };
        self.queue
            .publish_outgoing(&outgoing, false)
            .map_err(store_err)?;

        // assistant outputs only — this is what the reply-clamp reads
        if let Err(e) = self.models.record(&envelope.message_id, effective) {
            warn!(err = %e, "model map write failed");
        }
        Ok(())
    }

    /// Heartbeat path: no router, no persistent session, lowest tier.
    async fn run_heartbeat(&self, envelope: &IncomingEnvelope) -> Result<(), RuntimeError> {
        let thread_id = envelope.thread_id;
        let settings = self.settings.load();
        let thread = self
            .threads
            .ensure_thread(thread_id, None)
            .map_err(store_err)?;

        let assembler = PromptAssembler::new(&settings.timezone);
        let prompt = assembler.build_prompt(envelope, false, &[]);
        let system = format!(
            "{}\n\n{}",
            assembler.system_supplement(thread_id, &thread, &self.paths),
            assembler.heartbeat_supplement()
        );
        self.prompt_log.record(
            thread_id,
            &envelope.message_id,
            envelope.source,
            Tier::Simple,
            false,
            &prompt,
        );

        let tools = Arc::new(ToolServer::build(self.tool_ctx(envelope)));
        let text = self
            .dispatcher
            .heartbeat(&thread, prompt, system, tools, &envelope.message_id)
            .await?;

        let outbound = HistoryEntry {
            ts: now_ts(),
            thread_id,
            channel: envelope.channel.clone(),
            sender: "borg".to_string(),
            direction: Direction::Out,
            message: text.clone(),
            source: Some(Source::Heartbeat),
            source_thread_id: None,
            session_id: None,
            model: Some(Tier::Simple.model().to_string()),
        };
        if let Err(e) = self.history.append(&outbound) {
            warn!(err = %e, "heartbeat history append failed");
        }

        let outgoing = OutgoingEnvelope {
            channel: envelope.channel.clone(),
            thread_id,
            sender: "borg".to_string(),
            message: text,
            original_message: envelope.message.clone(),
            timestamp: now_ts(),
            message_id: envelope.message_id.clone(),
            model: Tier::Simple.model().to_string(),
            target_thread_id: None,
        };
        self.queue
            .publish_outgoing(&outgoing, true)
            .map_err(store_err)?;
        Ok(())
    }

    fn tool_ctx(&self, envelope: &IncomingEnvelope) -> ToolCtx {
        ToolCtx {
            source_thread_id: envelope.thread_id,
            channel: envelope.channel.clone(),
            queue: self.queue.clone(),
            threads: Arc::clone(&self.threads),
            paths: self.paths.clone(),
            docker_proxy_url: self.docker_proxy_url.clone(),
            http: self.http.clone(),
        }
    }
}

fn store_err(e: BorgError) -> RuntimeError {
    RuntimeError::Stream(format!("state store: {e}"))
}
