use chrono_tz::Tz;
use tracing::warn;

use borg_core::config::KNOWLEDGE_BASE_FILES;
use borg_core::{BorgPaths, HistoryEntry, IncomingEnvelope, Source, Thread, ThreadId};
use borg_history::format_history_lines;

/// Template seeded into a thread's `HEARTBEAT.md` on first heartbeat.
const HEARTBEAT_TEMPLATE: &str = "\
# Heartbeat checklist

## quick (every check-in)
- scan for new TODO or FIXME items in the working directory
last-run: never

## hourly
- review open tasks and stale branches
last-run: never

## daily
- summarize progress to the master thread if anything shipped
last-run: never
";

/// Builds the per-query prompt and the system-prompt supplements.
///
/// Stateless apart from the resolved timezone; one instance serves the
/// whole process.
pub struct PromptAssembler {
    tz: Tz,
}

impl PromptAssembler {
    pub fn new(timezone: &str) -> Self {
        let tz = timezone.parse().unwrap_or_else(|_| {
            warn!(timezone, "unknown timezone, falling back to UTC");
            Tz::UTC
        });
        Self { tz }
    }

    /// Assemble the query prompt: one timestamp line, the history block
    /// (new sessions only), the source prefix, then the raw message.
    pub fn build_prompt(
        &self,
        envelope: &IncomingEnvelope,
        new_session: bool,
        history: &[HistoryEntry],
    ) -> String {
        let now = chrono::Utc::now().with_timezone(&self.tz);
        let mut out = format!("[{}]\n", now.format("%a, %d %b %Y, %H:%M %Z"));

        if new_session && !history.is_empty() {
            out.push_str("\nRecent messages:\n");
            for line in format_history_lines(history) {
                out.push_str(&line);
                out.push('\n');
            }
        }

        out.push('\n');
        out.push_str(&source_prefix(envelope));
        out.push(' ');
        out.push_str(&envelope.message);
        out
    }

    /// Supplemental system prompt describing the thread's identity and the
    /// cross-thread fabric.
    pub fn system_supplement(
        &self,
        thread_id: ThreadId,
        thread: &Thread,
        paths: &BorgPaths,
    ) -> String {
        let mut out = format!(
            "You are the agent bound to thread {thread_id} (\"{}\").\n\
             Your working directory is {}.\n\n\
             Other threads run their own agents. Use the send_message tool to \
             reach them and list_threads to see who exists. Messages you send \
             arrive in the target thread tagged as cross-thread.\n\
             The shared message history is at {} (one JSON object per line; \
             filter on threadId). The thread registry is at {}.\n",
            thread.name,
            thread.cwd.display(),
            paths.history_file().display(),
            paths.threads_file().display(),
        );
        if thread_id.is_master() {
            out.push_str(&format!(
                "\nYou are the master thread. You coordinate the other threads: \
                 collect their cross-thread reports, keep the shared knowledge \
                 base current, and redistribute work when a thread stalls. The \
                 knowledge base files live in your working directory: {}.\n",
                KNOWLEDGE_BASE_FILES.join(", ")
            ));
        }
        out
    }

    /// Extra system prompt for heartbeat check-ins.
    pub fn heartbeat_supplement(&self) -> String {
        format!(
            "This is a heartbeat check-in, not a user message.\n\
             Read HEARTBEAT.md in your working directory. If it does not \
             exist, create it with exactly this content:\n\n{HEARTBEAT_TEMPLATE}\n\
             Run the quick checks every time; run the hourly and daily checks \
             when their recorded last-run timestamps are old enough, and \
             update those timestamps after running them.\n\
             If nothing needs attention, reply with exactly HEARTBEAT_OK and \
             nothing else."
        )
    }
}

/// The closed source → prefix mapping.
fn source_prefix(envelope: &IncomingEnvelope) -> String {
    match envelope.source {
        Source::User => format!("[{} via {}]:", envelope.sender, envelope.channel),
        Source::CrossThread => format!(
            "[Cross-thread from {} (thread {})]:",
            envelope.sender,
            envelope
                .source_thread_id
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        Source::Heartbeat => "[Heartbeat check-in]:".to_string(),
        Source::Cli => "[CLI message]:".to_string(),
        Source::System => "[System event]:".to_string(),
    }
}
